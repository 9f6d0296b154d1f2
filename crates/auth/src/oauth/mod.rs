pub mod copilot;

use crate::device::DeviceAuthSession;

/// Opens the verification page in the system browser. Failure is reported,
/// not fatal: the user can still open the URL by hand.
pub fn open_verification_page(session: &DeviceAuthSession) -> bool {
    match open::that(&session.verification_uri) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to open browser");
            false
        }
    }
}
