//! First-fit ascending allocation over a [`RegistryState`].
//!
//! These functions are pure: they mutate the in-memory document only. The
//! [`Registry`](crate::Registry) handle wraps them with locking and
//! persistence, and only writes when [`Change::changed`] is set.

use crate::error::{RegistryError, Result};
use crate::model::RegistryState;

/// Result of applying an operation to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change<T> {
    pub value: T,
    /// Whether the document differs from its pre-image.
    pub changed: bool,
}

impl<T> Change<T> {
    fn new(value: T, changed: bool) -> Self {
        Self { value, changed }
    }
}

/// Give `client_id` a port in `environment`.
///
/// Returns the existing port unchanged when the client already holds one.
pub fn assign(state: &mut RegistryState, client_id: &str, environment: &str) -> Result<Change<u16>> {
    let env = state.environment_mut(environment)?;

    if let Some(port) = env.port_of(client_id) {
        tracing::debug!(client_id, environment, port, "client already assigned");
        return Ok(Change::new(port, false));
    }

    let port = env
        .first_free_port()
        .ok_or_else(|| RegistryError::RangeExhausted {
            environment: environment.to_string(),
            start: env.port_range.start,
            end: env.port_range.end,
        })?;
    env.assignments.insert(client_id.to_string(), port);
    tracing::info!(client_id, environment, port, "assigned port");
    Ok(Change::new(port, true))
}

/// Drop the assignment of `client_id` in `environment`, if any.
///
/// Returns the released port.
pub fn release(
    state: &mut RegistryState,
    client_id: &str,
    environment: &str,
) -> Result<Change<Option<u16>>> {
    let env = state.environment_mut(environment)?;
    let released = env.assignments.remove(client_id);
    match released {
        Some(port) => tracing::info!(client_id, environment, port, "released port"),
        None => tracing::debug!(client_id, environment, "nothing to release"),
    }
    Ok(Change::new(released, released.is_some()))
}

/// Move `client_id` from `from_env` to `to_env`.
///
/// Both environments are checked before anything is touched. On
/// `RangeExhausted` the document is restored, so the client keeps its
/// assignment in `from_env`.
pub fn migrate(
    state: &mut RegistryState,
    client_id: &str,
    from_env: &str,
    to_env: &str,
) -> Result<Change<u16>> {
    state.environment(from_env)?;
    state.environment(to_env)?;

    let released = release(state, client_id, from_env)?;
    match assign(state, client_id, to_env) {
        Ok(assigned) => {
            tracing::info!(
                client_id,
                from_env,
                to_env,
                port = assigned.value,
                "migrated client"
            );
            Ok(Change::new(
                assigned.value,
                released.changed || assigned.changed,
            ))
        }
        Err(err) => {
            if let Some(port) = released.value {
                state
                    .environment_mut(from_env)?
                    .assignments
                    .insert(client_id.to_string(), port);
            }
            Err(err)
        }
    }
}
