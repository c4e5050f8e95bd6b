//! Function-code-keyed table of request handlers.
//!
//! The surrounding application supplies one callback per function code it
//! serves; the dispatcher consults the table once per request. Handlers
//! are synchronous and must not block — a handler that talks to a slow
//! backend owns its own timeout.

use std::collections::HashMap;

use fieldbus_proto::{ErrorCode, Reply, Request};
use tracing::debug;

pub type HandlerResult = std::result::Result<Reply, ErrorCode>;
pub type Handler = Box<dyn Fn(&Request) -> HandlerResult + Send + Sync>;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<u8, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the handler for a function code, replacing any previous one.
    pub fn register<F>(&mut self, function: u8, handler: F)
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.insert(function, Box::new(handler));
    }

    pub fn is_registered(&self, function: u8) -> bool {
        self.handlers.contains_key(&function)
    }

    /// Invoke the handler for the request's function code. Unregistered
    /// codes answer IllegalFunction.
    pub fn dispatch(&self, request: &Request) -> HandlerResult {
        match self.handlers.get(&request.function()) {
            Some(handler) => handler(request),
            None => {
                debug!("no handler for fc=0x{:02X}", request.function());
                Err(ErrorCode::IllegalFunction)
            }
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut codes: Vec<u8> = self.handlers.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("HandlerRegistry").field("functions", &codes).finish()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use fieldbus_proto::constants::{FN_READ_COILS, FN_READ_HOLDING_REGISTERS};

    #[test]
    fn test_registered_handler_is_invoked() {
        let mut registry = HandlerRegistry::new();
        registry.register(FN_READ_HOLDING_REGISTERS, |req| match req {
            Request::ReadHoldingRegisters { count, .. } => {
                Ok(Reply::ReadHoldingRegisters { values: vec![7; *count as usize] })
            }
            _ => Err(ErrorCode::ServerDeviceFailure),
        });

        let req = Request::ReadHoldingRegisters { start: 0, count: 2 };
        assert_eq!(
            registry.dispatch(&req).unwrap(),
            Reply::ReadHoldingRegisters { values: vec![7, 7] }
        );
    }

    #[test]
    fn test_unregistered_code_answers_illegal_function() {
        let registry = HandlerRegistry::new();
        let req = Request::ReadCoils { start: 0, count: 1 };
        assert_eq!(registry.dispatch(&req).unwrap_err(), ErrorCode::IllegalFunction);
        assert!(!registry.is_registered(FN_READ_COILS));
    }

    #[test]
    fn test_reregistering_replaces_the_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(FN_READ_COILS, |_| Err(ErrorCode::ServerBusy));
        registry.register(FN_READ_COILS, |_| Ok(Reply::ReadCoils { data: vec![1] }));
        let req = Request::ReadCoils { start: 0, count: 1 };
        assert_eq!(registry.dispatch(&req).unwrap(), Reply::ReadCoils { data: vec![1] });
    }
}
