//! Caller-supplied hooks that run against the live parameters right before they
//! are resolved into placeholder values.

use std::fmt::Debug;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::SqlEngineError;
use crate::params::BoundParameters;
use crate::types::RowValues;

/// Mutates bound parameters before every execution and every `add_batch`.
pub trait PreBindHook: Send + Sync + Debug {
    /// # Errors
    /// Any error aborts the execution before the driver is touched.
    fn apply(&self, params: &mut BoundParameters) -> Result<(), SqlEngineError>;
}

/// Fills "who" and "when" audit parameters that the caller did not bind itself.
#[derive(Debug, Clone)]
pub struct AuditFieldsHook {
    user: String,
    user_param: String,
    timestamp_param: String,
    clock: Arc<dyn Clock>,
}

impl AuditFieldsHook {
    /// Hook binding `:updated_by` and `:updated_at`.
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            user_param: "updated_by".to_string(),
            timestamp_param: "updated_at".to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_param_names(mut self, user_param: &str, timestamp_param: &str) -> Self {
        self.user_param = user_param.to_string();
        self.timestamp_param = timestamp_param.to_string();
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl PreBindHook for AuditFieldsHook {
    fn apply(&self, params: &mut BoundParameters) -> Result<(), SqlEngineError> {
        if params.get_named(&self.user_param).is_none() {
            params.set(self.user_param.clone(), RowValues::Text(self.user.clone()));
        }
        if params.get_named(&self.timestamp_param).is_none() {
            let now = self.clock.now().naive_utc();
            params.set(self.timestamp_param.clone(), RowValues::Timestamp(now));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::params::ParamValue;

    #[test]
    fn fills_only_missing_fields() {
        let clock = Arc::new(ManualClock::default());
        let hook = AuditFieldsHook::new("alice").with_clock(clock.clone());

        let mut params = BoundParameters::new();
        params.set("updated_by", "bob");
        hook.apply(&mut params).unwrap();

        assert_eq!(
            params.get_named("updated_by"),
            Some(&ParamValue::from("bob"))
        );
        assert_eq!(
            params.get_named("updated_at"),
            Some(&ParamValue::from(clock.now().naive_utc()))
        );
    }

    #[test]
    fn custom_names() {
        let hook = AuditFieldsHook::new("svc").with_param_names("owner", "stamp");
        let mut params = BoundParameters::new();
        hook.apply(&mut params).unwrap();
        assert!(params.get_named("owner").is_some());
        assert!(params.get_named("stamp").is_some());
        assert!(params.get_named("updated_by").is_none());
    }
}
