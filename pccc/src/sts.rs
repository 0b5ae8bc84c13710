//! STS and extended STS diagnosis.
//!
//! Maps the status byte of a reply, and the extended status byte when
//! present, to a human readable description. The diagnoser never fails:
//! unknown codes render with their numeric values.

use crate::msg;

/// Evaluate the STS byte of a reply. Returns None when it indicates
/// success, otherwise a description of the failure.
pub fn sts_check(reply: &[u8]) -> Option<String> {
    let sts = msg::sts(reply);
    if sts == 0 {
        return None;
    }
    let mut remote = false;
    let text = match sts {
        // Local link errors.
        0x01 => "Destination node is out of buffer space".into(),
        0x02 => "Cannot guarantee delivery, link layer".into(),
        0x03 => "Duplicate token holder detected".into(),
        0x04 => "Local port is disconnected".into(),
        0x05 => "Application layer timed out waiting for response".into(),
        0x06 => "Duplicate node detected".into(),
        0x07 => "Station is offline".into(),
        0x08 => "Hardware fault".into(),
        // Remote errors.
        0x10 => {
            remote = true;
            "Illegal command or format".into()
        }
        0x20 => {
            remote = true;
            "Host has a problem and will not communicate".into()
        }
        0x30 => {
            remote = true;
            "Remote node host is missing, disconnected, or shut down".into()
        }
        0x40 => {
            remote = true;
            "Host could not complete function due to hardware fault".into()
        }
        0x50 => {
            remote = true;
            "Addressing problem or memory protect rungs".into()
        }
        0x60 => {
            remote = true;
            "Function not allowed due to command protection selection".into()
        }
        0x70 => {
            remote = true;
            "Processor is in program mode".into()
        }
        0x80 => {
            remote = true;
            "Compatibility mode file missing or communication zone problem".into()
        }
        0x90 => {
            remote = true;
            "Remote node cannot buffer command".into()
        }
        0xa0 | 0xc0 => {
            remote = true;
            "Wait ACK".into()
        }
        0xb0 => {
            remote = true;
            "Remote node problem due to download".into()
        }
        0xf0 => {
            remote = true;
            ext_sts(reply)
        }
        other => format!("Undefined STS 0x{:x}", other),
    };
    Some(format!(
        "{} node {}(dec) error : {}",
        if remote { "Remote" } else { "Local" },
        msg::src(reply),
        text
    ))
}

/// Describe an extended STS, whose meaning depends on the originating
/// command opcode.
fn ext_sts(reply: &[u8]) -> String {
    let cmd = msg::cmd(reply);
    let es = msg::ext_sts(reply).unwrap_or(0);
    match cmd {
        // DH/DH+ data table error codes.
        0x0f => ext_sts_dh(reply, es),
        // DH485 error codes.
        0x0b | 0x1a | 0x1b => ext_sts_485(reply, es, cmd),
        // Other commands shouldn't return EXT STS values.
        other => format!("CMD 0x{:x} returned unexpected EXT STS 0x{:x}", other, es),
    }
}

fn ext_sts_dh(reply: &[u8], es: u8) -> String {
    match es {
        0x01 => "A field has an illegal value".into(),
        0x02 => "Less levels specified in address than minimum for any address".into(),
        0x03 => "More levels specified in address than system supports".into(),
        0x04 => "Symbol not found".into(),
        0x05 => "Symbol is of improper format".into(),
        0x06 => "Address doesn't point to something usable".into(),
        0x07 => "File is wrong size".into(),
        0x08 => "Cannot complete request, situation has changed since start of the command".into(),
        0x09 => "Data or file is too large".into(),
        0x0a => "Transaction size plus word address is too large".into(),
        0x0b => "Access denied, improper privilege".into(),
        0x0c => "Condition cannot be generated, resource is not available".into(),
        0x0d => "Condition already exists, resource is already available".into(),
        0x0e => "Command cannot be executed".into(),
        0x0f => "Histogram overflow".into(),
        0x10 => "No access".into(),
        0x11 => "Illegal data type".into(),
        0x12 => "Invalid parameter or invalid data".into(),
        0x13 => "Address reference exists to deleted area".into(),
        0x14 => "Command execution failure for unknown reason".into(),
        0x15 => "Data conversion error".into(),
        0x16 => "Scanner not able to communicate with 1771 rack adapter".into(),
        0x17 => "Type mismatch".into(),
        0x18 => "1771 module response was not valid".into(),
        0x19 => "Duplicate label".into(),
        0x1a => ext_sts_file_open(reply),
        0x1b => ext_sts_program_owner(reply),
        0x1e => "Data table element protection violation".into(),
        0x1f => "Temporary internal problem".into(),
        0x22 => "Remote rack fault".into(),
        0x23 => "Timeout".into(),
        0x24 => "Unknown error".into(),
        other => format!("Undefined EXT STS 0x{:x} for CMD 0x0f", other),
    }
}

fn ext_sts_485(reply: &[u8], es: u8, cmd: u8) -> String {
    match es {
        0x07 => "Insufficient memory module size".into(),
        0x0b => "Access denied, privilege violation".into(),
        0x0c => "Resource not available or can not do".into(),
        0x0e => "CMD can not be executed".into(),
        0x12 => "Invalid parameter".into(),
        0x14 => "Failure during processing".into(),
        0x19 => "Duplicate label".into(),
        0x1a => ext_sts_file_open(reply),
        0x1b => ext_sts_program_owner(reply),
        other => format!("Undefined EXT STS 0x{:x} for CMD 0x{:x}", other, cmd),
    }
}

fn ext_sts_file_open(reply: &[u8]) -> String {
    match msg::owner_node(reply) {
        Some(node) => format!(
            "File is open; node {} owns it.  For SLC 5/05 node 256 indicates the Ethernet port",
            node
        ),
        None => "File is open; another node owns it".into(),
    }
}

fn ext_sts_program_owner(reply: &[u8]) -> String {
    match msg::owner_node(reply) {
        Some(node) => format!(
            "Node {} is the program owner.  For SLC 5/05 node 256 indicates the Ethernet port",
            node
        ),
        None => "Another node is the program owner".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(src: u8, cmd: u8, sts: u8, ext: &[u8]) -> Vec<u8> {
        let mut m = vec![0x02, src, cmd | 0x40, sts, 0x34, 0x12];
        m.extend_from_slice(ext);
        m
    }

    #[test]
    fn zero_sts_is_success() {
        assert!(sts_check(&reply(1, 0x0f, 0x00, &[])).is_none());
    }

    #[test]
    fn local_error_names_local_node() {
        let diag = sts_check(&reply(3, 0x06, 0x05, &[])).unwrap();
        assert_eq!(
            diag,
            "Local node 3(dec) error : Application layer timed out waiting for response"
        );
    }

    #[test]
    fn remote_major_code() {
        let diag = sts_check(&reply(1, 0x0f, 0x70, &[])).unwrap();
        assert!(diag.starts_with("Remote node 1(dec) error : Processor is in program mode"));
    }

    #[test]
    fn ext_sts_type_mismatch() {
        let diag = sts_check(&reply(1, 0x0f, 0xf0, &[0x17])).unwrap();
        assert!(diag.contains("Type mismatch"));
    }

    #[test]
    fn ext_sts_file_open_includes_owner() {
        // Byte 5 carries the owning node for EXT STS 0x1a.
        let mut m = reply(1, 0x0f, 0xf0, &[0x1a]);
        m[5] = 9;
        let diag = sts_check(&m).unwrap();
        assert!(diag.contains("node 9 owns it"));
    }

    #[test]
    fn undefined_ext_sts_never_fails() {
        let diag = sts_check(&reply(1, 0x0f, 0xf0, &[0x55])).unwrap();
        assert!(diag.contains("Undefined EXT STS 0x55 for CMD 0x0f"));
        let diag = sts_check(&reply(1, 0x1a, 0xf0, &[0x55])).unwrap();
        assert!(diag.contains("Undefined EXT STS 0x55 for CMD 0x1a"));
    }

    #[test]
    fn non_data_table_command_with_ext_sts() {
        let diag = sts_check(&reply(1, 0x06, 0xf0, &[0x01])).unwrap();
        assert!(diag.contains("returned unexpected EXT STS"));
    }

    #[test]
    fn undefined_sts_renders_numeric() {
        let diag = sts_check(&reply(1, 0x0f, 0x09, &[])).unwrap();
        assert!(diag.contains("Undefined STS 0x9"));
    }
}
