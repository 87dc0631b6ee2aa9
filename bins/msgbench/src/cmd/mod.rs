pub mod run;
pub mod worker;

use std::sync::Arc;

use bench_worker::DriverRegistry;
use driver_loopback::LoopbackDriverFactory;

/// Драйверы, вкомпилированные в этот бинарник.
pub fn registry() -> DriverRegistry {
    DriverRegistry::new().with(driver_loopback::DRIVER_NAME, Arc::new(LoopbackDriverFactory))
}
