//! Компактное wire-представление latency гистограмм.
//!
//! Гистограмма сериализуется в HdrHistogram V2 + deflate и передаётся
//! в JSON строкой base64. Принимающая сторона декодирует буфер любого
//! размера и складывает гистограммы без потерь.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hdrhistogram::Histogram;
use hdrhistogram::serialization::{Deserializer, Serializer, V2DeflateSerializer};

/// Точность всех latency гистограмм.
pub const SIGNIFICANT_DIGITS: u8 = 5;

/// Верхняя граница publish / schedule / publish-delay гистограмм: 30 s в µs.
pub const SHORT_LATENCY_MAX_MICROS: u64 = 30 * 1_000_000;

/// Верхняя граница end-to-end гистограммы: 12 h в µs.
pub const END_TO_END_MAX_MICROS: u64 = 12 * 60 * 60 * 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum HistogramCodecError {
    #[error("encode histogram: {0}")]
    Encode(String),
    #[error("decode histogram: {0}")]
    Decode(String),
    #[error("decode histogram: base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

fn with_bounds(highest: u64) -> Histogram<u64> {
    // Both bounds are constants accepted by hdrhistogram (1 < 2 * lowest <= highest).
    Histogram::new_with_bounds(1, highest, SIGNIFICANT_DIGITS)
        .expect("constant histogram bounds are valid")
}

/// Гистограмма для publish, schedule и publish-delay latency.
pub fn new_latency_histogram() -> Histogram<u64> {
    with_bounds(SHORT_LATENCY_MAX_MICROS)
}

pub fn new_end_to_end_histogram() -> Histogram<u64> {
    with_bounds(END_TO_END_MAX_MICROS)
}

/// V2 + deflate encoding. Буфер растёт удвоением по мере записи.
pub fn encode(histogram: &Histogram<u64>) -> Result<Vec<u8>, HistogramCodecError> {
    let mut buffer = Vec::new();
    V2DeflateSerializer::new()
        .serialize(histogram, &mut buffer)
        .map_err(|e| HistogramCodecError::Encode(format!("{e:?}")))?;
    Ok(buffer)
}

pub fn decode(bytes: &[u8]) -> Result<Histogram<u64>, HistogramCodecError> {
    Deserializer::new()
        .deserialize(&mut Cursor::new(bytes))
        .map_err(|e| HistogramCodecError::Decode(format!("{e:?}")))
}

pub fn encode_base64(histogram: &Histogram<u64>) -> Result<String, HistogramCodecError> {
    Ok(STANDARD.encode(encode(histogram)?))
}

pub fn decode_base64(text: &str) -> Result<Histogram<u64>, HistogramCodecError> {
    decode(&STANDARD.decode(text)?)
}

/// `#[serde(with = "...")]` адаптер: гистограмма ↔ base64 строка.
pub mod serde_base64 {
    use hdrhistogram::Histogram;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(histogram: &Histogram<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        let text = super::encode_base64(histogram).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Histogram<u64>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode_base64(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_histogram_survives_roundtrip() {
        let mut h = new_end_to_end_histogram();
        // Spread samples across many buckets so the encoded form spans several buffer growths.
        for i in 0..200_000u64 {
            h.saturating_record(1 + i * 211 % END_TO_END_MAX_MICROS);
        }
        let bytes = encode(&h).unwrap();
        assert!(bytes.len() > 1024);

        let back = decode(&bytes).unwrap();
        assert_eq!(back.len(), h.len());
        assert_eq!(back.max(), h.max());
        assert_eq!(back.value_at_quantile(0.99), h.value_at_quantile(0.99));
    }

    #[test]
    fn empty_histogram_roundtrip() {
        let h = new_latency_histogram();
        let back = decode_base64(&encode_base64(&h).unwrap()).unwrap();
        assert_eq!(back.len(), 0);
    }

    #[test]
    fn truncated_buffer_fails_to_decode() {
        let mut h = new_latency_histogram();
        h.saturating_record(1_500);
        let bytes = encode(&h).unwrap();
        assert!(decode(&bytes[..bytes.len() / 2]).is_err());
        assert!(decode_base64("not base64 at all!").is_err());
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut h = new_latency_histogram();
        h.saturating_record(SHORT_LATENCY_MAX_MICROS * 10);
        assert_eq!(h.len(), 1);
        assert!(h.max() >= SHORT_LATENCY_MAX_MICROS);
    }
}
