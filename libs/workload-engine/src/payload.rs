//! Пул payload'ов для `/start-load`.

use std::fs;
use std::path::Path;

use rand::Rng;

use bench_api::Workload;

use crate::error::EngineError;

/// Пул по настройкам workload'а: сгенерированный или из файла.
pub fn build_pool(workload: &Workload) -> Result<Vec<Vec<u8>>, EngineError> {
    if workload.use_randomized_payloads {
        return Ok(randomized(
            workload.message_size,
            workload.random_bytes_ratio,
            workload.randomized_payload_pool_size,
        ));
    }
    let path = workload
        .payload_file
        .as_deref()
        .ok_or_else(|| EngineError::payload("<none>", "payload_file is not set"))?;
    load(Path::new(path), workload.message_size)
}

/// `pool_size` payload'ов: первые `message_size * ratio` байт случайные,
/// остальное нули (удобно для проверки сжатия).
pub fn randomized(message_size: usize, random_bytes_ratio: f64, pool_size: usize) -> Vec<Vec<u8>> {
    let random_bytes = ((message_size as f64 * random_bytes_ratio) as usize).min(message_size);
    let mut rng = rand::rng();
    (0..pool_size)
        .map(|_| {
            let mut payload = vec![0u8; message_size];
            rng.fill(&mut payload[..random_bytes]);
            payload
        })
        .collect()
}

/// Файл даёт один payload, каталог — по одному на каждый файл в нём.
pub fn load(path: &Path, message_size: usize) -> Result<Vec<Vec<u8>>, EngineError> {
    let meta = fs::metadata(path).map_err(|e| EngineError::payload(path.display().to_string(), e))?;
    if !meta.is_dir() {
        return Ok(vec![read_one(path, message_size)?]);
    }

    let mut files = Vec::new();
    let entries = fs::read_dir(path).map_err(|e| EngineError::payload(path.display().to_string(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::payload(path.display().to_string(), e))?;
        if entry.path().is_file() {
            files.push(entry.path());
        }
    }
    if files.is_empty() {
        return Err(EngineError::payload(
            path.display().to_string(),
            "directory contains no payload files",
        ));
    }
    files.sort();
    files.iter().map(|f| read_one(f, message_size)).collect()
}

fn read_one(path: &Path, message_size: usize) -> Result<Vec<u8>, EngineError> {
    let data = fs::read(path).map_err(|e| EngineError::payload(path.display().to_string(), e))?;
    if data.len() != message_size {
        tracing::warn!(
            path = %path.display(),
            actual = data.len(),
            expected = message_size,
            "payload size differs from message_size"
        );
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn randomized_payloads_keep_zero_tail() {
        let pool = randomized(100, 0.25, 8);
        assert_eq!(pool.len(), 8);
        for payload in &pool {
            assert_eq!(payload.len(), 100);
            assert!(payload[25..].iter().all(|b| *b == 0));
        }
        // 8 × 25 случайных байт не могут все совпасть
        assert!(pool.iter().any(|p| p[..25] != pool[0][..25]));
    }

    #[test]
    fn full_ratio_fills_whole_payload() {
        let pool = randomized(16, 1.0, 1);
        assert_eq!(pool[0].len(), 16);
    }

    #[test]
    fn loads_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("payload.bin");
        fs::write(&file, [7u8; 10]).unwrap();
        let pool = load(&file, 10).unwrap();
        assert_eq!(pool, vec![vec![7u8; 10]]);
    }

    #[test]
    fn directory_yields_one_payload_per_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), [1u8; 4]).unwrap();
        fs::write(dir.path().join("b.bin"), [2u8; 6]).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let pool = load(dir.path(), 4).unwrap();
        assert_eq!(pool, vec![vec![1u8; 4], vec![2u8; 6]]);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load(dir.path(), 4), Err(EngineError::Payload { .. })));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load(Path::new("/definitely/not/here.bin"), 4).is_err());
    }
}
