use quotehub_types::{BrokerError, CacheAnalysisReport, CacheAnalysisSummary, CacheHotspot};

use crate::orchestrator::CacheOrchestrator;

/// Seconds of remaining TTL under which a cached key counts as a hotspot.
const HOTSPOT_TTL_SECS: u64 = 60;
/// Hit rate under which longer TTLs are recommended.
const LOW_HIT_RATE: f64 = 0.7;
/// Expired share above which warm-up is recommended.
const HIGH_EXPIRED_RATIO: f64 = 0.2;

impl CacheOrchestrator {
    /// Analyze cache performance over a set of keys.
    ///
    /// An entry is a hotspot when its remaining TTL is under 60 s or it has
    /// expired. Recommendations come from a closed catalogue keyed on the
    /// summary thresholds.
    ///
    /// # Errors
    /// `Storage` when the bulk lookup itself fails.
    pub async fn analyze_cache_performance(
        &self,
        keys: &[String],
    ) -> Result<CacheAnalysisReport, BrokerError> {
        let now = self.clock().now_utc();
        let records = self.store().mget(keys).await?;

        let mut cached = 0usize;
        let mut expired = 0usize;
        let mut hotspots = Vec::new();
        for (key, record) in keys.iter().zip(records) {
            match record {
                Some(rec) if rec.is_fresh(now) => {
                    cached += 1;
                    let remaining = rec.ttl_remaining(now);
                    if remaining < HOTSPOT_TTL_SECS {
                        hotspots.push(CacheHotspot {
                            key: key.clone(),
                            ttl_remaining: remaining,
                            expired: false,
                        });
                    }
                }
                Some(_) => {
                    expired += 1;
                    hotspots.push(CacheHotspot {
                        key: key.clone(),
                        ttl_remaining: 0,
                        expired: true,
                    });
                }
                None => {}
            }
        }

        let total = keys.len();
        let hit_rate = if total == 0 {
            0.0
        } else {
            cached as f64 / total as f64
        };
        let expired_ratio = if total == 0 {
            0.0
        } else {
            expired as f64 / total as f64
        };

        let mut recommendations = Vec::new();
        if hit_rate < LOW_HIT_RATE {
            recommendations
                .push("Hit rate below 70%: consider longer TTLs for stable data".to_string());
        }
        if expired_ratio > HIGH_EXPIRED_RATIO {
            recommendations
                .push("Over 20% of entries expired: schedule warm-up for hot keys".to_string());
        }
        if !hotspots.is_empty() {
            recommendations.push(format!(
                "{} keys at or past expiry: warm them before peak hours",
                hotspots.len()
            ));
        }
        if recommendations.is_empty() {
            recommendations.push("Cache performing within thresholds".to_string());
        }

        Ok(CacheAnalysisReport {
            summary: CacheAnalysisSummary {
                total_keys: total,
                cached,
                expired,
                hit_rate,
            },
            hotspots,
            recommendations,
        })
    }
}
