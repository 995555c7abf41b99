use raplcap_raw::MsrError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaplcapError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Topology unavailable: {0}")]
    TopologyUnavailable(String),

    #[error("No MSR device available for CPU {cpu}: {source}")]
    DeviceUnavailable { cpu: u32, source: MsrError },

    #[error("Register I/O failed: {0}")]
    RegisterIo(MsrError),

    #[error("RAPL session is not initialized")]
    NotInitialized,
}

impl From<MsrError> for RaplcapError {
    fn from(e: MsrError) -> Self {
        match e {
            MsrError::OpenFailed { cpu, .. } => RaplcapError::DeviceUnavailable { cpu, source: e },
            other => RaplcapError::RegisterIo(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, RaplcapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_failure_maps_to_device_unavailable() {
        let err: RaplcapError = MsrError::OpenFailed {
            cpu: 4,
            msr_safe_error: std::io::Error::from(std::io::ErrorKind::NotFound),
            msr_error: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        }
        .into();
        assert!(matches!(err, RaplcapError::DeviceUnavailable { cpu: 4, .. }));
    }

    #[test]
    fn test_access_failure_maps_to_register_io() {
        let err: RaplcapError = MsrError::ShortRead {
            cpu: 0,
            msr: 0x610,
            len: 0,
        }
        .into();
        assert!(matches!(err, RaplcapError::RegisterIo(_)));
        assert!(err.to_string().contains("0x610"));
    }
}
