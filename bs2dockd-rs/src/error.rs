use thiserror::Error;

/* Domain-specific error variants for the daemon.                  */
/*                                                                 */
/* Using explicit variants instead of opaque strings lets each     */
/* layer take structured recovery actions (retry on read failures, */
/* reject on `ModeConflict`, drop a single client on               */
/* `IpcClientStuck`) and gives IPC clients stable error text.      */
#[allow(dead_code)]
#[derive(Debug, Error)]
pub enum DockError {
    #[error("no BS2 / BS2 PRO dock could be opened")]
    DeviceOpenFailed,

    #[error("device read failed: {source}")]
    DeviceReadFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("device write failed: {source}")]
    DeviceWriteFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("inbound report failed frame validation")]
    FrameInvalid,

    #[error("ACK did not arrive within {timeout_ms} ms")]
    AckTimeout { timeout_ms: u64 },

    #[error("auto-control and custom-speed are mutually exclusive")]
    ModeConflict,

    #[error("malformed IPC message: {0}")]
    IpcDecodeFailed(String),

    #[error("IPC client write deadline elapsed")]
    IpcClientStuck,

    #[error("failed to persist configuration: {0}")]
    ConfigSaveFailed(String),
}

impl DockError {
    /* Wrap an I/O error from a device write, mapping "no handle open" */
    /* onto the same variant so callers see one failure mode.          */
    pub fn write_not_connected() -> Self {
        DockError::DeviceWriteFailed {
            source: std::io::Error::new(std::io::ErrorKind::NotConnected, "device not connected"),
        }
    }
}
