//! Egress proxy pool
//!
//! Health is derived from the consecutive-failure streak so a proxy that
//! starts failing leaves rotation quickly; the longer-lived success rate only
//! shapes the selection weight and dashboard reporting.

use tracing::{debug, info, warn};
use url::Url;

use crate::config::ProxyPoolConfig;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{NewProxy, Page, PageRequest, Proxy, ProxyCriteria, ProxyFilter};
use crate::utils::urls::validate_proxy_uri;
use crate::utils::SharedClock;

/// Keeps a proxy with a collapsed success rate selectable at a low weight
const WEIGHT_FLOOR: f64 = 0.01;

/// Relative selection weight: favours a high success rate and a short
/// failure streak
pub fn selection_weight(proxy: &Proxy) -> f64 {
    let rate = (proxy.success_rate / 100.0).clamp(0.0, 1.0);
    (rate + WEIGHT_FLOOR) / (1.0 + f64::from(proxy.fail_count))
}

/// Weighted pick given a uniform roll in `[0, 1)`
fn pick_weighted(candidates: &[Proxy], roll: f64) -> Option<&Proxy> {
    let total: f64 = candidates.iter().map(selection_weight).sum();
    if candidates.is_empty() || total <= 0.0 {
        return None;
    }

    let mut target = roll.clamp(0.0, 1.0) * total;
    for candidate in candidates {
        let weight = selection_weight(candidate);
        if target < weight {
            return Some(candidate);
        }
        target -= weight;
    }
    candidates.last()
}

fn scheme_of(uri: &str) -> Option<String> {
    Url::parse(uri).ok().map(|u| u.scheme().to_ascii_lowercase())
}

#[derive(Clone)]
pub struct ProxyPool {
    database: Database,
    config: ProxyPoolConfig,
    clock: SharedClock,
}

impl ProxyPool {
    pub fn new(database: Database, config: ProxyPoolConfig, clock: SharedClock) -> Self {
        Self {
            database,
            config,
            clock,
        }
    }

    pub fn health_threshold(&self) -> u32 {
        self.config.health_threshold
    }

    /// `fail_count < health threshold`
    pub fn is_healthy(&self, proxy: &Proxy) -> bool {
        proxy.fail_count < self.config.health_threshold
    }

    pub async fn add(&self, proxy: NewProxy) -> AppResult<Proxy> {
        validate_proxy_uri(&proxy.uri).map_err(AppError::validation)?;
        let created = self
            .database
            .create_proxy(&proxy, self.config.health_threshold, self.clock.now())
            .await?;
        info!("Added proxy {} ({})", created.id, created.masked_uri());
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> AppResult<Proxy> {
        self.database
            .get_proxy(id, self.config.health_threshold)
            .await?
            .ok_or_else(|| AppError::not_found("proxy", id))
    }

    pub async fn list(&self, filter: &ProxyFilter, page: &PageRequest) -> AppResult<Page<Proxy>> {
        self.database
            .list_proxies(filter, self.config.health_threshold, page)
            .await
    }

    /// Pick an active, healthy proxy. The proxy is not reserved; many
    /// requests may share it.
    pub async fn acquire(&self, criteria: &ProxyCriteria) -> AppResult<Proxy> {
        let schemes: Option<Vec<String>> = criteria
            .schemes
            .as_ref()
            .map(|s| s.iter().map(|scheme| scheme.to_ascii_lowercase()).collect());

        let candidates: Vec<Proxy> = self
            .database
            .eligible_proxies(self.config.health_threshold)
            .await?
            .into_iter()
            .filter(|proxy| !criteria.exclude.contains(&proxy.id))
            .filter(|proxy| match &schemes {
                Some(allowed) => {
                    scheme_of(&proxy.uri).is_some_and(|scheme| allowed.contains(&scheme))
                }
                None => true,
            })
            .collect();

        match pick_weighted(&candidates, fastrand::f64()) {
            Some(proxy) => {
                debug!(
                    "Acquired proxy {} (success rate {:.1}%, fail streak {}) from {} candidates",
                    proxy.id,
                    proxy.success_rate,
                    proxy.fail_count,
                    candidates.len()
                );
                Ok(proxy.clone())
            }
            None => {
                warn!("Proxy pool exhausted: no active, healthy proxy matches");
                Err(AppError::pool_exhausted(
                    "no active, healthy proxy matches the criteria",
                ))
            }
        }
    }

    pub async fn record_success(&self, id: i64) -> AppResult<Proxy> {
        let before = self.get(id).await?;
        self.database
            .record_proxy_success(id, self.config.success_rate_alpha, self.clock.now())
            .await?;
        let after = self.get(id).await?;
        if !self.is_healthy(&before) && before.is_active {
            info!("Proxy {} recovered and is back in rotation", id);
        }
        Ok(after)
    }

    pub async fn record_failure(&self, id: i64, reason: &str) -> AppResult<Proxy> {
        if !self
            .database
            .record_proxy_failure(id, self.config.success_rate_alpha, reason, self.clock.now())
            .await?
        {
            return Err(AppError::not_found("proxy", id));
        }

        let after = self.get(id).await?;
        if after.fail_count == self.config.health_threshold {
            warn!(
                "Proxy {} reached {} consecutive failures and left rotation: {}",
                id, after.fail_count, reason
            );
        } else {
            debug!("Proxy {} failure {}: {}", id, after.fail_count, reason);
        }
        Ok(after)
    }

    /// Clear failure streak and success-rate history; `is_active` is kept
    pub async fn reset_stats(&self, id: i64) -> AppResult<Proxy> {
        if !self.database.reset_proxy_stats(id, self.clock.now()).await? {
            return Err(AppError::not_found("proxy", id));
        }
        info!("Reset statistics of proxy {}", id);
        self.get(id).await
    }

    /// Administrative toggle. Requests already bound to the proxy keep it.
    pub async fn set_active(&self, id: i64, active: bool) -> AppResult<Proxy> {
        if !self
            .database
            .set_proxy_active(id, active, self.clock.now())
            .await?
        {
            return Err(AppError::not_found("proxy", id));
        }
        info!(
            "Proxy {} {}",
            id,
            if active { "activated" } else { "deactivated" }
        );
        self.get(id).await
    }

    pub async fn delete(&self, id: i64) -> AppResult<()> {
        if !self.database.delete_proxy(id).await? {
            return Err(AppError::not_found("proxy", id));
        }
        info!("Deleted proxy {}", id);
        Ok(())
    }
}
