//! Pairing gate port: decides whether a device may use the transport.

use std::future::Future;

use hearth_domain::device::Serial;
use hearth_domain::error::HubError;

/// Boolean authorization over device serials.
///
/// A device is authorized once it is paired to an owner, or while an
/// unexpired entry key issued for it is pending.
pub trait PairingGate {
    fn is_authorized(&self, serial: &Serial) -> impl Future<Output = Result<bool, HubError>> + Send;
}

impl<T: PairingGate + Send + Sync> PairingGate for std::sync::Arc<T> {
    fn is_authorized(&self, serial: &Serial) -> impl Future<Output = Result<bool, HubError>> + Send {
        (**self).is_authorized(serial)
    }
}

/// Gate that lets every device through.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenPairingGate;

impl PairingGate for OpenPairingGate {
    fn is_authorized(&self, _serial: &Serial) -> impl Future<Output = Result<bool, HubError>> + Send {
        async { Ok(true) }
    }
}
