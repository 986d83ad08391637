//! Runtime error types.
//!
//! Every failure during simulation surfaces as a [`SimError`] and is never
//! downgraded to a default value.

/// Errors raised while executing a simulation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    /// No region of an address space covers the address.
    #[error("address 0x{addr:x} is not mapped")]
    AddressNotMapped {
        /// The accessed address.
        addr: u64,
    },

    /// The access starts in a region but runs past its end.
    #[error("access of {size} bytes at 0x{addr:x} crosses region boundary at 0x{boundary:x}")]
    RegionBoundaryCrossed {
        /// Start address.
        addr: u64,
        /// Access size in bytes.
        size: u32,
        /// First address past the region.
        boundary: u64,
    },

    /// A new mapping overlaps an existing one.
    #[error("region 0x{base:x}+0x{size:x} overlaps an existing mapping")]
    RegionOverlap {
        /// Base of the rejected region.
        base: u64,
        /// Size of the rejected region.
        size: u64,
    },

    /// Address-space accesses are 1 to 8 bytes.
    #[error("invalid access size {0}")]
    InvalidAccessSize(u32),

    /// A memory index beyond its size.
    #[error("index {index} out of bounds for size {size}")]
    IndexOutOfBounds {
        /// The accessed index.
        index: i128,
        /// The storage size.
        size: u64,
    },

    /// A register-file access at an offset holding no register.
    #[error("no register at offset 0x{offset:x}")]
    NoRegister {
        /// The accessed byte offset.
        offset: u64,
    },

    /// An IR construct the interpreter does not implement in this position.
    #[error("unsupported construct: {what}")]
    UnsupportedConstruct {
        /// Description of the construct.
        what: String,
    },

    /// Comb re-evaluation nested deeper than the configured bound.
    #[error("combinational cycle detected in {component}.{process} at depth {depth}")]
    CombCycleDetected {
        /// Instance path of the component.
        component: String,
        /// Process name.
        process: String,
        /// The depth reached.
        depth: usize,
    },

    /// A sync or comb body tried to block.
    #[error("process '{process}' suspended outside a task context")]
    IllegalSuspension {
        /// Process name.
        process: String,
    },

    /// Integer division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// An expression could not be evaluated.
    #[error("evaluation error: {reason}")]
    EvalError {
        /// What went wrong.
        reason: String,
    },

    /// A field name or index that does not exist.
    #[error("unknown field '{field}' on '{component}'")]
    UnknownField {
        /// Instance path.
        component: String,
        /// Field name or index.
        field: String,
    },

    /// A method name that does not exist on the target.
    #[error("unknown method '{method}' on {target}")]
    UnknownMethod {
        /// Description of the target object.
        target: String,
        /// Method name.
        method: String,
    },

    /// A port accessed before it was bound.
    #[error("port '{port}' of '{component}' is not bound")]
    UnboundPort {
        /// Instance path.
        component: String,
        /// Port name.
        port: String,
    },

    /// An `assert` or `assume` evaluated false.
    #[error("assertion failed at {time_fs} fs: {message}")]
    AssertionFailed {
        /// Simulated time of the failure.
        time_fs: u64,
        /// The assertion message.
        message: String,
    },

    /// An event already has a callback.
    #[error("event already has a bound callback")]
    CallbackAlreadyBound,

    /// `release` on a lock nobody holds.
    #[error("lock released while not held")]
    LockNotHeld,

    /// A component path that does not exist.
    #[error("no component at '{0}'")]
    NoSuchComponent(String),
}

impl SimError {
    /// Shorthand for [`SimError::EvalError`].
    pub fn eval(reason: impl Into<String>) -> Self {
        SimError::EvalError {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`SimError::UnsupportedConstruct`].
    pub fn unsupported(what: impl Into<String>) -> Self {
        SimError::UnsupportedConstruct { what: what.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_address_not_mapped() {
        let err = SimError::AddressNotMapped { addr: 0x1000 };
        assert_eq!(err.to_string(), "address 0x1000 is not mapped");
    }

    #[test]
    fn display_boundary_crossed() {
        let err = SimError::RegionBoundaryCrossed {
            addr: 0xffe,
            size: 4,
            boundary: 0x1000,
        };
        assert_eq!(
            err.to_string(),
            "access of 4 bytes at 0xffe crosses region boundary at 0x1000"
        );
    }

    #[test]
    fn display_comb_cycle() {
        let err = SimError::CombCycleDetected {
            component: "top.alu".into(),
            process: "update".into(),
            depth: 1001,
        };
        assert_eq!(
            err.to_string(),
            "combinational cycle detected in top.alu.update at depth 1001"
        );
    }

    #[test]
    fn display_no_register() {
        assert_eq!(
            SimError::NoRegister { offset: 0x1c }.to_string(),
            "no register at offset 0x1c"
        );
    }

    #[test]
    fn display_unsupported() {
        assert_eq!(
            SimError::unsupported("await inside if").to_string(),
            "unsupported construct: await inside if"
        );
    }

    #[test]
    fn display_assertion() {
        let err = SimError::AssertionFailed {
            time_fs: 20,
            message: "count < 4".into(),
        };
        assert_eq!(err.to_string(), "assertion failed at 20 fs: count < 4");
    }

    #[test]
    fn display_unbound_port() {
        let err = SimError::UnboundPort {
            component: "top".into(),
            port: "req".into(),
        };
        assert_eq!(err.to_string(), "port 'req' of 'top' is not bound");
    }
}
