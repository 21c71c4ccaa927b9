// Archivo: retry.rs
// Propósito: reglas de reintento por paso. Cada regla decide, dado el
// número de fallos reintentables acumulados, si hay otro intento y cuánto
// esperar antes de hacerlo.
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Regla de reintento asociada a un paso al construir el flight.
///
/// `max_count` es la cantidad máxima de reintentos (no de intentos): con
/// `max_count = 3` el paso se ejecuta como mucho 4 veces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryRule {
    /// Sin reintentos: un fallo reintentable se trata como fatal.
    #[default]
    None,
    /// Espera siempre el mismo intervalo.
    FixedInterval { interval_ms: u64, max_count: u32 },
    /// Duplica la espera en cada fallo, con techo en `max_interval_ms`.
    ExponentialBackoff {
        initial_ms: u64,
        max_interval_ms: u64,
        max_count: u32,
    },
    /// Espera aleatoria en `[0, increment_ms * max_concurrency)`. Pensada
    /// para pasos que compiten entre sí (por ejemplo, por un lock) y así
    /// desincronizar a los competidores.
    RandomBackoff {
        increment_ms: u64,
        max_concurrency: u32,
        max_count: u32,
    },
}

impl RetryRule {
    pub fn fixed(interval: Duration, max_count: u32) -> Self {
        RetryRule::FixedInterval { interval_ms: interval.as_millis() as u64,
                                   max_count }
    }

    pub fn exponential(initial: Duration, max_interval: Duration, max_count: u32) -> Self {
        RetryRule::ExponentialBackoff { initial_ms: initial.as_millis() as u64,
                                        max_interval_ms: max_interval.as_millis() as u64,
                                        max_count }
    }

    pub fn random_backoff(increment: Duration, max_concurrency: u32, max_count: u32) -> Self {
        RetryRule::RandomBackoff { increment_ms: increment.as_millis() as u64,
                                   max_concurrency,
                                   max_count }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            RetryRule::None => 0,
            RetryRule::FixedInterval { max_count, .. }
            | RetryRule::ExponentialBackoff { max_count, .. }
            | RetryRule::RandomBackoff { max_count, .. } => *max_count,
        }
    }

    /// Espera antes del siguiente intento tras `failures` fallos
    /// reintentables consecutivos (empezando en 1). `None` significa que
    /// los reintentos se agotaron.
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures > self.max_retries() {
            return None;
        }
        let millis = match self {
            RetryRule::None => return None,
            RetryRule::FixedInterval { interval_ms, .. } => *interval_ms,
            RetryRule::ExponentialBackoff { initial_ms,
                                            max_interval_ms,
                                            .. } => {
                let factor = 1u64.checked_shl(failures - 1).unwrap_or(u64::MAX);
                initial_ms.saturating_mul(factor).min(*max_interval_ms)
            }
            RetryRule::RandomBackoff { increment_ms,
                                       max_concurrency,
                                       .. } => {
                let upper = increment_ms.saturating_mul(u64::from(*max_concurrency));
                if upper == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..upper)
                }
            }
        };
        Some(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_retries() {
        assert_eq!(RetryRule::None.next_delay(1), None);
    }

    #[test]
    fn fixed_interval_stops_after_max_count() {
        let rule = RetryRule::fixed(Duration::from_millis(10), 2);
        assert_eq!(rule.next_delay(1), Some(Duration::from_millis(10)));
        assert_eq!(rule.next_delay(2), Some(Duration::from_millis(10)));
        assert_eq!(rule.next_delay(3), None);
    }

    #[test]
    fn exponential_doubles_until_cap() {
        let rule = RetryRule::exponential(Duration::from_millis(100), Duration::from_millis(350), 10);
        assert_eq!(rule.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(rule.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(rule.next_delay(3), Some(Duration::from_millis(350)));
        assert_eq!(rule.next_delay(10), Some(Duration::from_millis(350)));
        assert_eq!(rule.next_delay(11), None);
    }

    #[test]
    fn random_backoff_stays_in_range() {
        let rule = RetryRule::random_backoff(Duration::from_millis(500), 4, 5);
        for failures in 1..=5 {
            let delay = rule.next_delay(failures).unwrap();
            assert!(delay < Duration::from_millis(2000));
        }
        assert_eq!(rule.next_delay(6), None);
    }
}
