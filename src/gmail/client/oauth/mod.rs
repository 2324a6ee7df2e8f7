pub mod endpoints;
pub(crate) mod google;

use backon::ExponentialBuilder;
use std::{sync::LazyLock, time::Duration};

/// Retry policy for token endpoint calls that failed at the transport level or with a 5xx.
pub(crate) static OAUTH_RETRY_POLICY: LazyLock<ExponentialBuilder> = LazyLock::new(|| {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(2)
        .with_jitter()
});
