//! Dynamic endpoint discovery (§4.3 "Discovery driver").
//!
//! A route's `load_balancing.driver` selects how its endpoint set is kept up
//! to date. `Static` is a no-op: the endpoints configured at load time never
//! change. `Etcd` watches a key prefix and pushes the current member list
//! into the route's [`LoadBalancer`] whenever it changes.

use etcd_client::{Client, GetOptions, WatchOptions};
use log::{error, info, warn};
use std::sync::Arc;

use crate::services::load_balancer::LoadBalancer;

/// Discovers and keeps an endpoint set current for a single route. `Static`
/// never touches the balancer after construction; `Etcd` spawns a watch
/// task that pushes fresh endpoint lists as they arrive.
pub enum DiscoveryDriver {
    Static,
    Etcd(EtcdDriver),
}

impl DiscoveryDriver {
    /// Performs an initial resolution and spawns any background watch task
    /// needed to keep `balancer`'s endpoint set current. Returns immediately;
    /// watching (if any) happens on a spawned task.
    pub async fn start(&self, balancer: Arc<LoadBalancer>) {
        match self {
            DiscoveryDriver::Static => {}
            DiscoveryDriver::Etcd(driver) => driver.start(balancer).await,
        }
    }
}

/// Watches `prefix/service_name/*` in etcd; each child key's value is taken
/// verbatim as an endpoint URL. Reconnects are left to the next watch
/// iteration rather than retried in a tight loop.
pub struct EtcdDriver {
    endpoints: Vec<String>,
    prefix: String,
    service_name: String,
}

impl EtcdDriver {
    pub fn new(endpoints: Vec<String>, prefix: String, service_name: String) -> Self {
        Self {
            endpoints,
            prefix,
            service_name,
        }
    }

    fn watch_key(&self) -> String {
        format!("{}/{}", self.prefix.trim_end_matches('/'), self.service_name)
    }
}

impl EtcdDriver {
    async fn start(&self, balancer: Arc<LoadBalancer>) {
        let endpoints = self.endpoints.clone();
        let key = self.watch_key();
        let service_name = self.service_name.clone();

        let mut client = match Client::connect(endpoints, None).await {
            Ok(client) => client,
            Err(e) => {
                error!("discovery[{}]: failed to connect to etcd: {}", service_name, e);
                return;
            }
        };

        match client
            .get(key.as_str(), Some(GetOptions::new().with_prefix()))
            .await
        {
            Ok(resp) => {
                let members = members_from_kvs(resp.kvs());
                if !members.is_empty() {
                    balancer.set_endpoints(members);
                }
            }
            Err(e) => warn!("discovery[{}]: initial get failed: {}", service_name, e),
        }

        tokio::spawn(async move {
            let (mut watcher, mut stream) = match client
                .watch(key.as_str(), Some(WatchOptions::new().with_prefix()))
                .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    error!("discovery[{}]: failed to start watch: {}", service_name, e);
                    return;
                }
            };
            let _ = watcher.request_progress().await;

            info!("discovery[{}]: watching {}", service_name, key);
            while let Ok(Some(resp)) = stream.message().await {
                for event in resp.events() {
                    let _ = event.kv();
                }
                if let Ok(Some(snapshot)) = client
                    .get(key.as_str(), Some(GetOptions::new().with_prefix()))
                    .await
                    .map(Some)
                {
                    let members = members_from_kvs(snapshot.kvs());
                    if !members.is_empty() {
                        balancer.set_endpoints(members);
                    }
                }
            }
            warn!("discovery[{}]: watch stream closed", service_name);
        });
    }
}

fn members_from_kvs(kvs: &[etcd_client::KeyValue]) -> Vec<String> {
    kvs.iter()
        .filter_map(|kv| kv.value_str().ok().map(|s| s.to_string()))
        .collect()
}
