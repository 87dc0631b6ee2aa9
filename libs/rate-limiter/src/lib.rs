//! Token bucket rate limiter для пейсинга отправок.
//!
//! Вся бухгалтерия резерваций выполняется под одним mutex'ом на экземпляр,
//! сон — снаружи. Асинхронный код берёт паузу через [`RateLimiter::reserve`]
//! и спит сам (`tokio::time::sleep`), блокирующий — через [`RateLimiter::acquire`].

mod smooth;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use smooth::{Mode, SmoothState};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateLimiterError {
    #[error("rate must be positive and finite, got {0}")]
    InvalidRate(f64),
    #[error("requested permits must be positive")]
    ZeroPermits,
    #[error("warmup period must be positive")]
    InvalidWarmup,
}

/// Источник времени и сна. Подменяется в тестах.
pub trait SleepingStopwatch: Send + Sync {
    /// Монотонное время в наносекундах от произвольной точки.
    fn read_nanos(&self) -> u64;
    fn sleep_nanos(&self, nanos: u64);
}

/// Реальные часы: `Instant` + `thread::sleep`.
pub struct SystemStopwatch {
    start: Instant,
}

impl SystemStopwatch {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemStopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl SleepingStopwatch for SystemStopwatch {
    fn read_nanos(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    fn sleep_nanos(&self, nanos: u64) {
        if nanos > 0 {
            std::thread::sleep(Duration::from_nanos(nanos));
        }
    }
}

/// Во сколько раз медленнее выдаются permits в холодном состоянии.
pub const COLD_FACTOR: f64 = 3.0;

/// Сколько секунд неиспользованной ёмкости копит bursty limiter.
pub const MAX_BURST_SECONDS: f64 = 1.0;

pub struct RateLimiter {
    stopwatch: Arc<dyn SleepingStopwatch>,
    state: Mutex<SmoothState>,
}

impl RateLimiter {
    /// Bursty limiter: до 1 секунды неиспользованных permits выдаются сразу.
    pub fn create(permits_per_second: f64) -> Result<Self, RateLimiterError> {
        Self::bursty(Arc::new(SystemStopwatch::new()), permits_per_second)
    }

    /// Limiter с прогревом: стартует холодным и за `warmup` выходит на
    /// `permits_per_second`. Простой дольше `warmup` снова его охлаждает.
    pub fn create_with_warmup(permits_per_second: f64, warmup: Duration) -> Result<Self, RateLimiterError> {
        Self::warming_up(Arc::new(SystemStopwatch::new()), permits_per_second, warmup)
    }

    pub fn bursty(
        stopwatch: Arc<dyn SleepingStopwatch>,
        permits_per_second: f64,
    ) -> Result<Self, RateLimiterError> {
        Self::with_mode(stopwatch, permits_per_second, Mode::Bursty { max_burst_seconds: MAX_BURST_SECONDS })
    }

    pub fn warming_up(
        stopwatch: Arc<dyn SleepingStopwatch>,
        permits_per_second: f64,
        warmup: Duration,
    ) -> Result<Self, RateLimiterError> {
        if warmup.is_zero() {
            return Err(RateLimiterError::InvalidWarmup);
        }
        let mode = Mode::WarmingUp {
            warmup_period: warmup.as_nanos() as f64,
            cold_factor: COLD_FACTOR,
            slope: 0.0,
            threshold_permits: 0.0,
        };
        Self::with_mode(stopwatch, permits_per_second, mode)
    }

    fn with_mode(
        stopwatch: Arc<dyn SleepingStopwatch>,
        permits_per_second: f64,
        mode: Mode,
    ) -> Result<Self, RateLimiterError> {
        check_rate(permits_per_second)?;
        let mut state = SmoothState::new(mode);
        state.set_rate(permits_per_second, stopwatch.read_nanos());
        Ok(Self { stopwatch, state: Mutex::new(state) })
    }

    fn lock(&self) -> MutexGuard<'_, SmoothState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Сменить rate. Уже оплаченные резервации не пересчитываются.
    pub fn set_rate(&self, permits_per_second: f64) -> Result<(), RateLimiterError> {
        check_rate(permits_per_second)?;
        let now = self.stopwatch.read_nanos();
        self.lock().set_rate(permits_per_second, now);
        Ok(())
    }

    pub fn rate(&self) -> f64 {
        self.lock().rate()
    }

    /// Зарезервировать permits и вернуть паузу, которую вызывающий
    /// должен выждать сам.
    pub fn reserve(&self, permits: u32) -> Result<Duration, RateLimiterError> {
        check_permits(permits)?;
        let now = self.stopwatch.read_nanos();
        let wait = self.lock().reserve(permits, now);
        Ok(Duration::from_nanos(wait))
    }

    /// Блокирующее получение permits. Возвращает проспанное время в секундах.
    pub fn acquire(&self, permits: u32) -> Result<f64, RateLimiterError> {
        let wait = self.reserve(permits)?;
        self.stopwatch.sleep_nanos(wait.as_nanos() as u64);
        Ok(wait.as_secs_f64())
    }

    /// Получить permits, если ждать придётся не дольше `timeout`.
    /// При отказе состояние limiter'а не меняется.
    pub fn try_acquire(&self, permits: u32, timeout: Duration) -> Result<bool, RateLimiterError> {
        check_permits(permits)?;
        let timeout = timeout.as_nanos() as u64;
        let wait = {
            let mut state = self.lock();
            let now = self.stopwatch.read_nanos();
            if state.earliest_available() > now.saturating_add(timeout) {
                return Ok(false);
            }
            state.reserve(permits, now)
        };
        self.stopwatch.sleep_nanos(wait);
        Ok(true)
    }
}

fn check_rate(permits_per_second: f64) -> Result<(), RateLimiterError> {
    if permits_per_second > 0.0 && permits_per_second.is_finite() {
        Ok(())
    } else {
        Err(RateLimiterError::InvalidRate(permits_per_second))
    }
}

fn check_permits(permits: u32) -> Result<(), RateLimiterError> {
    if permits == 0 { Err(RateLimiterError::ZeroPermits) } else { Ok(()) }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RateLimiter[stableRate={:.1}qps]", self.rate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Time moves only when someone sleeps or the test advances it.
    #[derive(Default)]
    struct FakeStopwatch {
        now: AtomicU64,
    }

    impl FakeStopwatch {
        fn advance(&self, d: Duration) {
            self.now.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
        }
        fn elapsed(&self) -> f64 {
            self.now.load(Ordering::SeqCst) as f64 / 1e9
        }
    }

    impl SleepingStopwatch for FakeStopwatch {
        fn read_nanos(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
        fn sleep_nanos(&self, nanos: u64) {
            self.now.fetch_add(nanos, Ordering::SeqCst);
        }
    }

    fn fake() -> Arc<FakeStopwatch> {
        Arc::new(FakeStopwatch::default())
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-6, "expected {expected}, got {actual}");
    }

    // ─── bursty ───

    #[test]
    fn sequential_acquire_paces_at_rate() {
        let clock = fake();
        let limiter = RateLimiter::bursty(clock.clone(), 5.0).unwrap();

        let waits: Vec<f64> = (0..10).map(|_| limiter.acquire(1).unwrap()).collect();
        assert_eq!(waits[0], 0.0);
        for w in &waits[1..] {
            assert_close(*w, 0.2);
        }
        assert_close(clock.elapsed(), 9.0 / 5.0);
    }

    #[test]
    fn idle_longer_than_burst_resets_wait() {
        let clock = fake();
        let limiter = RateLimiter::bursty(clock.clone(), 2.0).unwrap();
        limiter.acquire(1).unwrap();
        limiter.acquire(1).unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(limiter.acquire(1).unwrap(), 0.0);
    }

    #[test]
    fn stored_permits_are_capped_at_one_second() {
        let clock = fake();
        let limiter = RateLimiter::bursty(clock.clone(), 10.0).unwrap();
        limiter.acquire(1).unwrap();
        clock.advance(Duration::from_secs(60));

        // 10 stored permits are free, the reservation after them pays full price.
        assert_eq!(limiter.acquire(10).unwrap(), 0.0);
        assert_eq!(limiter.acquire(1).unwrap(), 0.0);
        assert_close(limiter.acquire(1).unwrap(), 0.1);
    }

    #[test]
    fn set_rate_does_not_cheapen_pending_reservation() {
        let clock = fake();
        let limiter = RateLimiter::bursty(clock.clone(), 1.0).unwrap();
        assert_eq!(limiter.acquire(1).unwrap(), 0.0);

        limiter.set_rate(1000.0).unwrap();
        assert_close(limiter.acquire(1).unwrap(), 1.0);
        assert_close(limiter.acquire(1).unwrap(), 0.001);
        assert_close(limiter.rate(), 1000.0);
    }

    #[test]
    fn try_acquire_fails_without_side_effects() {
        let clock = fake();
        let limiter = RateLimiter::bursty(clock.clone(), 1.0).unwrap();
        limiter.acquire(1).unwrap();

        assert!(!limiter.try_acquire(1, Duration::from_millis(500)).unwrap());
        assert_eq!(clock.elapsed(), 0.0);

        assert!(limiter.try_acquire(1, Duration::from_secs(1)).unwrap());
        assert_close(clock.elapsed(), 1.0);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        assert_eq!(RateLimiter::create(0.0).unwrap_err(), RateLimiterError::InvalidRate(0.0));
        assert!(RateLimiter::create(f64::NAN).is_err());
        assert_eq!(
            RateLimiter::create_with_warmup(1.0, Duration::ZERO).unwrap_err(),
            RateLimiterError::InvalidWarmup
        );
        let limiter = RateLimiter::create(10.0).unwrap();
        assert_eq!(limiter.acquire(0).unwrap_err(), RateLimiterError::ZeroPermits);
        assert!(limiter.set_rate(-1.0).is_err());
    }

    // ─── warming up ───

    // rate 2/s, warmup 4s: threshold = 4 permits, max = 8, slope = 0.25 s/permit.
    fn warming(clock: Arc<FakeStopwatch>) -> RateLimiter {
        RateLimiter::warming_up(clock, 2.0, Duration::from_secs(4)).unwrap()
    }

    #[test]
    fn warmup_cost_equals_ramp_integral_in_any_chunking() {
        let one_by_one = fake();
        let limiter = warming(one_by_one.clone());
        for _ in 0..4 {
            limiter.acquire(1).unwrap();
        }
        limiter.acquire(1).unwrap();

        let at_once = fake();
        let limiter = warming(at_once.clone());
        limiter.acquire(4).unwrap();
        limiter.acquire(1).unwrap();

        assert_close(one_by_one.elapsed(), 4.0);
        assert_close(at_once.elapsed(), 4.0);
    }

    #[test]
    fn cold_permits_get_cheaper_towards_threshold() {
        let clock = fake();
        let limiter = warming(clock.clone());
        let waits: Vec<f64> = (0..6).map(|_| limiter.acquire(1).unwrap()).collect();
        assert_eq!(waits[0], 0.0);
        assert_close(waits[1], 1.375);
        assert_close(waits[2], 1.125);
        assert_close(waits[3], 0.875);
        assert_close(waits[4], 0.625);
        // below threshold: stable interval
        assert_close(waits[5], 0.5);
    }

    #[test]
    fn idling_for_warmup_period_cools_down() {
        let clock = fake();
        let limiter = warming(clock.clone());
        for _ in 0..12 {
            limiter.acquire(1).unwrap();
        }
        clock.advance(Duration::from_secs(8));
        limiter.acquire(1).unwrap();
        assert_close(limiter.acquire(1).unwrap(), 1.375);
    }
}
