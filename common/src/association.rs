use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use crate::config::AssociationPolicy;

pub trait Association {
    fn is_associated(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("network not associated after {attempts} polls")]
pub struct AssociationTimeout {
    pub attempts: u32,
}

/// Blocks until the link reports associated, sleeping between polls.
///
/// With `max_attempts: None` this never returns an error; an unreachable
/// network keeps the device here indefinitely. Returns the number of polls.
pub fn wait_until_associated<A, S>(
    link: &mut A,
    policy: &AssociationPolicy,
    mut sleep: S,
) -> Result<u32, AssociationTimeout>
where
    A: Association + ?Sized,
    S: FnMut(Duration),
{
    let interval = Duration::from_millis(policy.poll_interval_ms);
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);
        if link.is_associated() {
            info!("network associated after {attempts} poll(s)");
            return Ok(attempts);
        }

        if let Some(max) = policy.max_attempts {
            if attempts >= max {
                warn!("giving up on network association after {attempts} polls");
                return Err(AssociationTimeout { attempts });
            }
        }

        if attempts % 20 == 0 {
            warn!("still waiting for network association ({attempts} polls)");
        }
        sleep(interval);
    }
}
