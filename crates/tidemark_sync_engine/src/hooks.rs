//! Named extension points invoked during sync.

use crate::error::{EngineResult, SyncError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tidemark_sync_protocol::RemoteRecord;

/// Hook invoked with every decoded page of incoming changes, before it is
/// applied.
pub const INCOMING_CHANGES: &str = "incoming-changes";

const KNOWN_HOOKS: &[&str] = &[INCOMING_CHANGES];

/// Payload of the [`INCOMING_CHANGES`] hook.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingChanges {
    /// Collection timestamp of the page.
    pub last_modified: i64,
    /// Decoded changes.
    pub changes: Vec<RemoteRecord>,
}

type Handler = Arc<dyn Fn(IncomingChanges) -> EngineResult<IncomingChanges> + Send + Sync>;

/// Handlers registered per hook name.
///
/// Handlers run synchronously in registration order; each receives the
/// output of the previous one. A handler may rewrite or drop changes but
/// must not introduce ids absent from its input or repeat a change.
#[derive(Clone, Default)]
pub struct HookRegistry {
    handlers: BTreeMap<&'static str, Vec<Handler>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler.
    ///
    /// # Errors
    ///
    /// Returns a hook error for an unknown hook name.
    pub fn register<F>(&mut self, name: &str, handler: F) -> EngineResult<()>
    where
        F: Fn(IncomingChanges) -> EngineResult<IncomingChanges> + Send + Sync + 'static,
    {
        let known = KNOWN_HOOKS
            .iter()
            .find(|k| **k == name)
            .ok_or_else(|| SyncError::hook(format!("unknown hook {name}")))?;
        self.handlers.entry(*known).or_default().push(Arc::new(handler));
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, name: &str, handler: F) -> EngineResult<Self>
    where
        F: Fn(IncomingChanges) -> EngineResult<IncomingChanges> + Send + Sync + 'static,
    {
        self.register(name, handler)?;
        Ok(self)
    }

    /// Number of handlers for `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.handlers.get(name).map_or(0, Vec::len)
    }

    /// Runs the handlers of `name` over `payload`.
    ///
    /// # Errors
    ///
    /// Propagates handler errors, and fails with a hook error if a handler
    /// returns a record id more often than its input held it.
    pub fn invoke(&self, name: &str, payload: IncomingChanges) -> EngineResult<IncomingChanges> {
        let Some(handlers) = self.handlers.get(name) else {
            return Ok(payload);
        };
        handlers.iter().try_fold(payload, |input, handler| {
            let mut allowed: HashMap<String, usize> = HashMap::new();
            for change in &input.changes {
                *allowed.entry(change.id.clone()).or_default() += 1;
            }
            let output = handler(input)?;
            for change in &output.changes {
                match allowed.get_mut(&change.id) {
                    Some(left) if *left > 0 => *left -= 1,
                    Some(_) => {
                        return Err(SyncError::hook(format!(
                            "{name} handler duplicated record {}",
                            change.id
                        )))
                    }
                    None => {
                        return Err(SyncError::hook(format!(
                            "{name} handler introduced unknown record {}",
                            change.id
                        )))
                    }
                }
            }
            Ok(output)
        })
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<_, _> = self.handlers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("HookRegistry").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(ids: &[&str]) -> IncomingChanges {
        IncomingChanges {
            last_modified: 10,
            changes: ids
                .iter()
                .map(|id| {
                    RemoteRecord::new(*id, Some(10), json!({"n": 1}).as_object().cloned().unwrap())
                })
                .collect(),
        }
    }

    #[test]
    fn unknown_hook_is_rejected() {
        let mut hooks = HookRegistry::new();
        assert!(matches!(
            hooks.register("outgoing-changes", Ok),
            Err(SyncError::Hook(_))
        ));
        assert_eq!(hooks.count(INCOMING_CHANGES), 0);
    }

    #[test]
    fn handlers_chain_in_order() {
        let hooks = HookRegistry::new()
            .with(INCOMING_CHANGES, |mut p: IncomingChanges| {
                p.changes.retain(|c| c.id != "drop");
                Ok(p)
            })
            .unwrap()
            .with(INCOMING_CHANGES, |mut p: IncomingChanges| {
                for change in &mut p.changes {
                    change.fields.insert("seen".into(), json!(true));
                }
                Ok(p)
            })
            .unwrap();

        let out = hooks.invoke(INCOMING_CHANGES, payload(&["a", "drop"])).unwrap();
        assert_eq!(out.changes.len(), 1);
        assert_eq!(out.changes[0].fields["seen"], json!(true));
        assert_eq!(out.last_modified, 10);
    }

    #[test]
    fn introducing_ids_is_an_error() {
        let hooks = HookRegistry::new()
            .with(INCOMING_CHANGES, |mut p: IncomingChanges| {
                p.changes.push(RemoteRecord::tombstone("intruder", Some(1)));
                Ok(p)
            })
            .unwrap();
        let err = hooks.invoke(INCOMING_CHANGES, payload(&["a"])).unwrap_err();
        assert!(err.to_string().contains("intruder"));
    }

    #[test]
    fn duplicating_a_change_is_an_error() {
        let hooks = HookRegistry::new()
            .with(INCOMING_CHANGES, |mut p: IncomingChanges| {
                let copy = p.changes[0].clone();
                p.changes.push(copy);
                Ok(p)
            })
            .unwrap();
        let err = hooks.invoke(INCOMING_CHANGES, payload(&["a", "b"])).unwrap_err();
        assert!(matches!(err, SyncError::Hook(_)));
        assert!(err.to_string().contains("duplicated record a"));
    }

    #[test]
    fn repeated_input_ids_may_pass_through() {
        let hooks = HookRegistry::new().with(INCOMING_CHANGES, Ok).unwrap();
        let out = hooks.invoke(INCOMING_CHANGES, payload(&["a", "a"])).unwrap();
        assert_eq!(out.changes.len(), 2);
    }

    #[test]
    fn no_handlers_is_identity() {
        let hooks = HookRegistry::new();
        assert_eq!(
            hooks.invoke(INCOMING_CHANGES, payload(&["a"])).unwrap(),
            payload(&["a"])
        );
    }
}
