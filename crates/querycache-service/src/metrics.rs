//! Provides access to the statsd metrics system.
use std::collections::BTreeMap;
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::OnceLock;

use cadence::{Metric, MetricBuilder, StatsdClient, UdpMetricSink};

static METRICS_CLIENT: OnceLock<MetricsClient> = OnceLock::new();

thread_local! {
    static CURRENT_CLIENT: Option<&'static MetricsClient> = METRICS_CLIENT.get();
}

/// The metrics prelude that is necessary to use the client.
pub mod prelude {
    pub use cadence::prelude::*;
}

#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,

    /// Tags attached to every metric.
    tags: BTreeMap<String, String>,
}

impl MetricsClient {
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (tag, value) in self.tags.iter() {
            metric = metric.with_tag(tag, value);
        }
        metric.send()
    }
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &Self::Target {
        &self.statsd_client
    }
}

/// Tell the metrics system to report to statsd.
///
/// Only the first call installs a client, later calls are ignored.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    tags: BTreeMap<String, String>,
) -> io::Result<()> {
    let addrs: Vec<_> = host.to_socket_addrs()?.collect();
    let Some(first) = addrs.first() else {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "statsd host did not resolve to any address",
        ));
    };
    tracing::info!("Reporting metrics to statsd at {}", first);

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;
    let sink = UdpMetricSink::from(&addrs[..], socket).map_err(io::Error::other)?;
    let statsd_client = StatsdClient::from_sink(prefix, sink);

    if METRICS_CLIENT
        .set(MetricsClient {
            statsd_client,
            tags,
        })
        .is_err()
    {
        tracing::warn!("statsd client was already configured");
    }
    Ok(())
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked. For the most part
/// the [`metric!`](crate::metric) macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client {
            f(client)
        } else {
            Default::default()
        }
    })
}

/// Emits a metric.
#[macro_export]
macro_rules! metric {
    // counters
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send_metric(
                client.count_with_tags($id, $value)
                    $(.with_tag($k, $v))*
            );
        })
    }};

    // gauges
    (gauge($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send_metric(
                client.gauge_with_tags($id, $value)
                    $(.with_tag($k, $v))*
            );
        })
    }};

    // timers
    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send_metric(
                client.time_with_tags($id, $value)
                    $(.with_tag($k, $v))*
            );
        })
    }};
}
