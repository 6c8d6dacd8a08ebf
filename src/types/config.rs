//! Configuration types for the order pipeline.

use std::str::FromStr;
use std::time::Duration;

use crate::error::PipelineError;
use crate::messaging::FailurePolicy;
use crate::{
    DEFAULT_ALTERNATE_HOSTS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HTTP_PORT, DEFAULT_PREFETCH,
    DEFAULT_PUBLISH_TIMEOUT_MS, DEFAULT_RETRIES_PER_CANDIDATE, DEFAULT_RETRY_BACKOFF_MS,
    DEFAULT_STORE_DB, DEFAULT_STORE_URI, ORDERS_QUEUE,
};

/// Global service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Broker connection settings
    pub broker: BrokerSettings,

    /// Persistence collaborator settings
    pub store: StoreSettings,

    /// Consumer loop settings
    pub consumer: ConsumerSettings,

    /// HTTP listen port
    pub port: u16,
}

/// How to reach the broker and how hard to try.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Configured broker URI
    pub url: String,

    /// Connection attempts per candidate address
    pub retries_per_candidate: u32,

    /// Pause between attempts on the same candidate
    pub retry_backoff: Duration,

    /// Upper bound on a single connection attempt
    pub connect_timeout: Duration,

    /// Upper bound on a whole publish call
    pub publish_timeout: Duration,

    /// Hostnames substituted for a loopback host, in order
    pub alternate_hosts: Vec<String>,

    /// Durable queue carrying order events
    pub queue_name: String,
}

impl BrokerSettings {
    /// Settings for the given URI with every other value defaulted.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retries_per_candidate: DEFAULT_RETRIES_PER_CANDIDATE,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            publish_timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            alternate_hosts: DEFAULT_ALTERNATE_HOSTS.iter().map(|h| h.to_string()).collect(),
            queue_name: ORDERS_QUEUE.to_string(),
        }
    }

    /// Set the retry budget per candidate.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries_per_candidate = retries;
        self
    }

    /// Set the backoff between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the per-attempt connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the publish timeout.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }
}

/// Where the persistence collaborator lives.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub uri: String,
    pub database: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_STORE_URI.to_string(),
            database: DEFAULT_STORE_DB.to_string(),
        }
    }
}

/// Consumer loop tuning.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Maximum unacknowledged deliveries in flight
    pub prefetch: u16,

    /// What to do with a message whose handling failed
    pub failure_policy: FailurePolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("BROKER_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PipelineError::configuration("BROKER_URL", "must be set"))?;

        let retries_per_candidate: u32 =
            parse_or(&lookup, "BROKER_RETRIES_PER_CANDIDATE", DEFAULT_RETRIES_PER_CANDIDATE)?;
        if retries_per_candidate == 0 {
            return Err(PipelineError::configuration(
                "BROKER_RETRIES_PER_CANDIDATE",
                "must be at least 1",
            ));
        }

        let alternate_hosts = match lookup("BROKER_ALTERNATE_HOSTS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_ALTERNATE_HOSTS.iter().map(|h| h.to_string()).collect(),
        };

        let broker = BrokerSettings {
            url,
            retries_per_candidate,
            retry_backoff: Duration::from_millis(parse_or(
                &lookup,
                "BROKER_RETRY_BACKOFF_MS",
                DEFAULT_RETRY_BACKOFF_MS,
            )?),
            connect_timeout: Duration::from_millis(parse_or(
                &lookup,
                "BROKER_CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT_MS,
            )?),
            publish_timeout: Duration::from_millis(parse_or(
                &lookup,
                "BROKER_PUBLISH_TIMEOUT_MS",
                DEFAULT_PUBLISH_TIMEOUT_MS,
            )?),
            alternate_hosts,
            queue_name: lookup("ORDERS_QUEUE").unwrap_or_else(|| ORDERS_QUEUE.to_string()),
        };

        let consumer = ConsumerSettings {
            prefetch: parse_or(&lookup, "CONSUMER_PREFETCH", DEFAULT_PREFETCH)?,
            failure_policy: parse_or(&lookup, "CONSUMER_FAILURE_POLICY", FailurePolicy::default())?,
        };

        let store = StoreSettings {
            uri: lookup("STORE_URI").unwrap_or_else(|| DEFAULT_STORE_URI.to_string()),
            database: lookup("STORE_DB").unwrap_or_else(|| DEFAULT_STORE_DB.to_string()),
        };

        Ok(Self {
            broker,
            store,
            consumer,
            port: parse_or(&lookup, "PORT", DEFAULT_HTTP_PORT)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, PipelineError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| PipelineError::configuration(key, format!("invalid value {raw:?}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_broker_url_is_fatal() {
        let err = ServiceConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { ref key, .. } if key == "BROKER_URL"));

        let err = ServiceConfig::from_lookup(lookup_from(&[("BROKER_URL", "  ")])).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }

    #[test]
    fn test_defaults() {
        let config =
            ServiceConfig::from_lookup(lookup_from(&[("BROKER_URL", "amqp://localhost:5672")]))
                .unwrap();

        assert_eq!(config.broker.retries_per_candidate, 2);
        assert_eq!(config.broker.retry_backoff, Duration::from_secs(1));
        assert_eq!(config.broker.queue_name, "orders_queue");
        assert_eq!(
            config.broker.alternate_hosts,
            vec!["host.docker.internal".to_string(), "rabbitmq".to_string()]
        );
        assert_eq!(config.consumer.prefetch, 10);
        assert_eq!(config.consumer.failure_policy, FailurePolicy::Acknowledge);
        assert_eq!(config.store.uri, "mongodb://localhost:27017");
        assert_eq!(config.store.database, "orders_db");
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("BROKER_URL", "amqp://broker:5672"),
            ("BROKER_RETRIES_PER_CANDIDATE", "5"),
            ("BROKER_RETRY_BACKOFF_MS", "250"),
            ("BROKER_ALTERNATE_HOSTS", "gateway, ,mq"),
            ("CONSUMER_PREFETCH", "3"),
            ("CONSUMER_FAILURE_POLICY", "requeue"),
            ("STORE_DB", "orders_test"),
        ]))
        .unwrap();

        assert_eq!(config.broker.retries_per_candidate, 5);
        assert_eq!(config.broker.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.broker.alternate_hosts, vec!["gateway", "mq"]);
        assert_eq!(config.consumer.prefetch, 3);
        assert_eq!(config.consumer.failure_policy, FailurePolicy::Requeue);
        assert_eq!(config.store.database, "orders_test");
    }

    #[test]
    fn test_malformed_number_names_key() {
        let err = ServiceConfig::from_lookup(lookup_from(&[
            ("BROKER_URL", "amqp://localhost"),
            ("CONSUMER_PREFETCH", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("CONSUMER_PREFETCH"));

        let err = ServiceConfig::from_lookup(lookup_from(&[
            ("BROKER_URL", "amqp://localhost"),
            ("BROKER_RETRIES_PER_CANDIDATE", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }
}
