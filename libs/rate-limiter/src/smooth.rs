//! Арифметика token bucket'а. Всё время в наносекундах по stopwatch'у.
//!
//! Bursty: неиспользованные permits копятся до `max_burst_seconds` секунд
//! и выдаются бесплатно. Warming up: накопленные permits, наоборот,
//! дорогие; цена permit'а линейно растёт от `stable_interval` на пороге
//! до `cold_factor * stable_interval` в полностью холодном состоянии.
//!
//! ```text
//!          ^ throttling (interval)
//!   cold   +                  /
//!          |                 /.
//!          |                / .   <- площадь трапеции = warmup_period
//!          |               /  .
//!   stable +--------------/   .
//!          |          .   .   .
//!          +----------+-------+--> stored permits
//!          0      threshold  max
//! ```

#[derive(Debug, Clone, Copy)]
pub(crate) enum Mode {
    Bursty {
        max_burst_seconds: f64,
    },
    WarmingUp {
        warmup_period: f64,
        cold_factor: f64,
        slope: f64,
        threshold_permits: f64,
    },
}

#[derive(Debug)]
pub(crate) struct SmoothState {
    stored_permits: f64,
    max_permits: f64,
    stable_interval: f64,
    next_free_ticket: u64,
    mode: Mode,
}

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

impl SmoothState {
    pub(crate) fn new(mode: Mode) -> Self {
        Self {
            stored_permits: 0.0,
            max_permits: 0.0,
            stable_interval: 0.0,
            next_free_ticket: 0,
            mode,
        }
    }

    pub(crate) fn rate(&self) -> f64 {
        NANOS_PER_SECOND / self.stable_interval
    }

    pub(crate) fn set_rate(&mut self, permits_per_second: f64, now: u64) {
        self.resync(now);
        let stable_interval = NANOS_PER_SECOND / permits_per_second;
        self.stable_interval = stable_interval;

        let old_max = self.max_permits;
        match &mut self.mode {
            Mode::Bursty { max_burst_seconds } => {
                self.max_permits = *max_burst_seconds * permits_per_second;
                self.stored_permits = if old_max == 0.0 {
                    0.0
                } else {
                    self.stored_permits * self.max_permits / old_max
                };
            }
            Mode::WarmingUp { warmup_period, cold_factor, slope, threshold_permits } => {
                let cold_interval = stable_interval * *cold_factor;
                *threshold_permits = 0.5 * *warmup_period / stable_interval;
                self.max_permits =
                    *threshold_permits + 2.0 * *warmup_period / (stable_interval + cold_interval);
                *slope = (cold_interval - stable_interval) / (self.max_permits - *threshold_permits);
                // A freshly created limiter starts cold.
                self.stored_permits = if old_max == 0.0 {
                    self.max_permits
                } else {
                    self.stored_permits * self.max_permits / old_max
                };
            }
        }
    }

    /// Момент, когда можно выдать следующую резервацию.
    pub(crate) fn earliest_available(&self) -> u64 {
        self.next_free_ticket
    }

    /// Зарезервировать permits. Возвращает, сколько ждать от `now`.
    pub(crate) fn reserve(&mut self, permits: u32, now: u64) -> u64 {
        let moment = self.reserve_earliest_available(permits as f64, now);
        moment.saturating_sub(now)
    }

    fn reserve_earliest_available(&mut self, required: f64, now: u64) -> u64 {
        self.resync(now);
        let moment = self.next_free_ticket;
        let stored_to_spend = required.min(self.stored_permits);
        let fresh = required - stored_to_spend;
        let wait = self.stored_permits_to_wait_time(self.stored_permits, stored_to_spend)
            + fresh * self.stable_interval;

        self.next_free_ticket = self.next_free_ticket.saturating_add(wait as u64);
        self.stored_permits -= stored_to_spend;
        moment
    }

    /// Накопить permits за время простоя.
    fn resync(&mut self, now: u64) {
        if now > self.next_free_ticket {
            let cool_down = self.cool_down_interval();
            if cool_down > 0.0 {
                let new_permits = (now - self.next_free_ticket) as f64 / cool_down;
                self.stored_permits = self.max_permits.min(self.stored_permits + new_permits);
            }
            self.next_free_ticket = now;
        }
    }

    fn cool_down_interval(&self) -> f64 {
        match self.mode {
            Mode::Bursty { .. } => self.stable_interval,
            Mode::WarmingUp { warmup_period, .. } => warmup_period / self.max_permits,
        }
    }

    fn stored_permits_to_wait_time(&self, stored: f64, permits_to_take: f64) -> f64 {
        match self.mode {
            Mode::Bursty { .. } => 0.0,
            Mode::WarmingUp { slope, threshold_permits, .. } => {
                let permits_to_time = |permits: f64| self.stable_interval + permits * slope;

                let mut permits_to_take = permits_to_take;
                let mut nanos = 0.0;
                let above_threshold = stored - threshold_permits;
                if above_threshold > 0.0 {
                    let take_above = above_threshold.min(permits_to_take);
                    let length = permits_to_time(above_threshold)
                        + permits_to_time(above_threshold - take_above);
                    nanos = take_above * length / 2.0;
                    permits_to_take -= take_above;
                }
                nanos + self.stable_interval * permits_to_take
            }
        }
    }
}
