use animforge_core::CallerId;

/// Caller identity for a request, as asserted by the upstream auth gateway.
///
/// Present on every `/process` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    caller_id: CallerId,
}

impl CallerContext {
    pub fn new(caller_id: CallerId) -> Self {
        Self { caller_id }
    }

    pub fn caller_id(&self) -> &CallerId {
        &self.caller_id
    }
}
