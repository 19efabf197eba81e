use std::collections::BTreeMap;

use tracing::warn;

use crate::context::ConnectionContext;
use crate::error::SqlEngineError;

/// Connection contexts of one call chain, looked up by logical name.
///
/// Built at the top of a unit of work and passed down explicitly. Closing it
/// terminates every context it holds.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    contexts: BTreeMap<String, ConnectionContext>,
}

impl UnitOfWork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `context` under its own name.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::IllegalUsage`] if the name is already taken.
    pub fn insert(
        &mut self,
        context: ConnectionContext,
    ) -> Result<&ConnectionContext, SqlEngineError> {
        let name = context.name().to_string();
        if self.contexts.contains_key(&name) {
            return Err(SqlEngineError::IllegalUsage(format!(
                "connection '{name}' already registered in this unit of work"
            )));
        }
        let registered: &ConnectionContext = self.contexts.entry(name).or_insert(context);
        Ok(registered)
    }

    /// # Errors
    /// Returns [`SqlEngineError::State`] when no context is registered under `name`.
    pub fn get(&self, name: &str) -> Result<&ConnectionContext, SqlEngineError> {
        self.contexts.get(name).ok_or_else(|| {
            SqlEngineError::State(format!("no connection named '{name}' in this unit of work"))
        })
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.contexts.keys().map(String::as_str).collect()
    }

    /// Terminate every context. The first failure is returned, later ones are logged.
    ///
    /// # Errors
    /// Returns the first error raised while terminating.
    pub fn close(self) -> Result<(), SqlEngineError> {
        let mut first_error = None;
        for (name, context) in &self.contexts {
            if let Err(err) = context.terminate() {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    warn!(connection = %name, error = %err, "failed to terminate connection");
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::error::NativeError;
    use crate::test_utils::ScriptedConnection;
    use crate::types::DatabaseFamily;

    fn ctx(name: &str, conn: &ScriptedConnection) -> ConnectionContext {
        ConnectionContext::new(
            name,
            conn.clone().boxed(),
            EngineOptions::new(DatabaseFamily::Postgres),
        )
        .unwrap()
    }

    #[test]
    fn lookup_by_name() {
        let conn = ScriptedConnection::new();
        let mut uow = UnitOfWork::new();
        uow.insert(ctx("orders", &conn)).unwrap();
        uow.insert(ctx("audit", &conn)).unwrap();
        assert_eq!(uow.names(), vec!["audit", "orders"]);
        assert_eq!(uow.get("orders").unwrap().name(), "orders");
        assert!(matches!(uow.get("billing"), Err(SqlEngineError::State(_))));
        assert!(matches!(
            uow.insert(ctx("orders", &conn)),
            Err(SqlEngineError::IllegalUsage(_))
        ));
    }

    #[test]
    fn close_terminates_everything() {
        let conn = ScriptedConnection::new();
        let script = conn.handle();
        let mut uow = UnitOfWork::new();
        uow.insert(ctx("a", &conn)).unwrap();
        uow.insert(ctx("b", &conn)).unwrap();
        uow.get("a").unwrap().open_handle("SELECT 1").unwrap();
        uow.get("b").unwrap().open_handle("SELECT 2").unwrap();
        script.fail_close(Some(NativeError::new(None, 1, "gone")));
        assert!(uow.close().is_err());
    }
}
