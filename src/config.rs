// Constants and small value types describing the wire protocol and the
// external contracts (device path, socket names, credential set) the mux
// is wired up against.

/// Default UART device in the reference deployment.
pub const DEFAULT_DEVICE: &str = "/dev/ttySAC0";

/// Default abstract-namespace socket name for the Bluetooth endpoint.
pub const DEFAULT_BT_SOCK: &str = "bt_sock";
/// Default abstract-namespace socket name for the ANT endpoint.
pub const DEFAULT_ANT_SOCK: &str = "ant_sock";

/// Baud rate used on both directions of the UART.
pub const BAUD_RATE: u32 = 3_000_000;

/// Backlog passed to `listen()` for each endpoint's server rendezvous.
pub const LISTEN_BACKLOG: i32 = 1;

pub(crate) const BLUETOOTH_UID: u32 = 1002;
pub(crate) const SYSTEM_UID: u32 = 1000;
pub(crate) const ROOT_UID: u32 = 0;
pub(crate) const AID_USER: u32 = 100_000;
pub(crate) const AID_APP: u32 = 10_000;

/// Status-channel property keys (see §6 of the specification).
pub mod property_keys {
    pub const HCI_FILTER_STATUS: &str = "vendor.wc_transport.hci_filter_status";
    pub const REF_COUNT: &str = "vendor.wc_transport.ref_count";
    pub const CLEAN_UP: &str = "vendor.wc_transport.clean_up";
    pub const START_HCI: &str = "vendor.wc_transport.start_hci";
}

/// Reduces a raw peer uid to the "effective uid" used for the credential
/// gate, following the Android `AID_USER`/`AID_APP` convention: uids above
/// the application id base are folded back down to an app-relative id.
pub fn effective_uid(uid: u32) -> u32 {
    if uid <= BLUETOOTH_UID {
        return uid;
    }
    let reduced = uid % AID_USER;
    if reduced > BLUETOOTH_UID {
        reduced % AID_APP
    } else {
        reduced
    }
}

/// Whether an effective uid is allowed to hold an endpoint peer handle.
pub fn is_allowed_uid(effective: u32) -> bool {
    effective == BLUETOOTH_UID || effective == SYSTEM_UID || effective == ROOT_UID
}

/// Which client endpoint a frame belongs to / is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Side {
    #[display("bt")]
    Bt,
    #[display("ant")]
    Ant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_uid_passes_through_low_uids() {
        assert_eq!(effective_uid(0), 0);
        assert_eq!(effective_uid(1000), 1000);
        assert_eq!(effective_uid(1002), 1002);
    }

    #[test]
    fn effective_uid_reduces_app_uids() {
        // 10000 * 1 + 20 folded through AID_USER then AID_APP.
        assert_eq!(effective_uid(1_010_020), 20);
    }

    #[test]
    fn effective_uid_reduces_user_uids_within_bluetooth_bound() {
        // A per-user uid that lands at or below BLUETOOTH_UID after the
        // first reduction is used directly, without a second reduction.
        assert_eq!(effective_uid(100_000 + 1000), 1000);
    }

    #[test]
    fn credential_gate_rejects_unmapped_uids() {
        assert!(!is_allowed_uid(effective_uid(10_020)));
        assert!(is_allowed_uid(effective_uid(1_010_020)));
    }
}
