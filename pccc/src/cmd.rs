//! PCCC command initiation.
//!
//! Each method validates its arguments, assembles the command body after
//! the common header, and hands the slot to the session for
//! transmission. With a completion callback the method returns
//! `Ok(None)` immediately; without one it blocks until the command
//! completes and returns the decoded reply.

use crate::addr;
use crate::data;
use crate::error::{PcccError, PcccResult};
use crate::msg::{Notify, ReplyDecoder};
use crate::session::Session;
use crate::types::{FileData, FileType, Mode, PlcAddress, ReplyValue};
use bytes::BufMut;

/// Largest data payload accepted by the echo command.
const ECHO_MAX: usize = 243;

/// Largest encoded data section of a typed transfer.
const PTL_MAX_BYTES: usize = 236;

/// Largest encoded set list of a read-modify-write.
const RMW_MAX_BYTES: usize = 243;

impl Session {
    /// Echo: transmit up to 243 bytes and verify the interface returns
    /// them unchanged (CMD 0x06, FNC 0x00).
    pub async fn cmd_echo(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        payload: &[u8],
    ) -> PcccResult<Option<ReplyValue>> {
        if payload.is_empty() {
            return Err(PcccError::InvalidParameter(
                "number of bytes must not be zero".into(),
            ));
        }
        if payload.len() > ECHO_MAX {
            return Err(PcccError::InvalidParameter(
                "number of bytes too large".into(),
            ));
        }
        let i = self.cmd_init(notify, ReplyDecoder::Echo, dnode, 0x06, 0x00)?;
        {
            let slot = self.slot_mut(i);
            slot.buf.put_slice(payload);
            slot.bytes = payload.len();
        }
        self.check_slot_capacity(i, "echo command")?;
        self.cmd_send(i).await
    }

    /// Set the interface's timeout, NAK and ENQ limits in one command
    /// (CMD 0x06, FNC 0x02).
    pub async fn cmd_set_variables(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        cycles: u8,
        naks: u8,
        enqs: u8,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.cmd_init(notify, ReplyDecoder::None, dnode, 0x06, 0x02)?;
        self.slot_mut(i).buf.put_slice(&[cycles, naks, enqs]);
        self.check_slot_capacity(i, "set variables command")?;
        self.cmd_send(i).await
    }

    /// Set the interface's acknowledgement timeout in module clock
    /// cycles (CMD 0x06, FNC 0x04).
    pub async fn cmd_set_timeout(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        cycles: u8,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.cmd_init(notify, ReplyDecoder::None, dnode, 0x06, 0x04)?;
        self.slot_mut(i).buf.put_u8(cycles);
        self.check_slot_capacity(i, "set timeout command")?;
        self.cmd_send(i).await
    }

    /// Set the NAKs the interface accepts per transmission (CMD 0x06,
    /// FNC 0x05).
    pub async fn cmd_set_naks(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        naks: u8,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.cmd_init(notify, ReplyDecoder::None, dnode, 0x06, 0x05)?;
        self.slot_mut(i).buf.put_u8(naks);
        self.check_slot_capacity(i, "set NAKs command")?;
        self.cmd_send(i).await
    }

    /// Set the ENQs the interface issues per transmission (CMD 0x06,
    /// FNC 0x06).
    pub async fn cmd_set_enqs(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        enqs: u8,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.cmd_init(notify, ReplyDecoder::None, dnode, 0x06, 0x06)?;
        self.slot_mut(i).buf.put_u8(enqs);
        self.check_slot_capacity(i, "set ENQs command")?;
        self.cmd_send(i).await
    }

    /// Read the DH-485 maximum solicit address parameter (CMD 0x06,
    /// FNC 0x09). The reply carries [`ReplyValue::LinkParam`].
    pub async fn cmd_read_link_param(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.cmd_init(notify, ReplyDecoder::LinkParam, dnode, 0x06, 0x09)?;
        {
            let slot = self.slot_mut(i);
            slot.buf.put_u16_le(0); // parameter address
            slot.buf.put_u8(1); // size
        }
        self.check_slot_capacity(i, "read link param command")?;
        self.cmd_send(i).await
    }

    /// Set the DH-485 maximum solicit address parameter (CMD 0x06,
    /// FNC 0x0A).
    pub async fn cmd_set_link_param(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        max: u8,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.cmd_init(notify, ReplyDecoder::None, dnode, 0x06, 0x0a)?;
        {
            let slot = self.slot_mut(i);
            slot.buf.put_u16_le(0); // parameter address
            slot.buf.put_u8(1); // size
            slot.buf.put_u8(max);
        }
        self.check_slot_capacity(i, "set link param command")?;
        self.cmd_send(i).await
    }

    /// Change the mode of a MicroLogix 1000 processor (CMD 0x0F,
    /// FNC 0x3A). Supports [`Mode::Program`] and [`Mode::Run`].
    pub async fn cmd_change_mode_micrologix1000(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        mode: Mode,
    ) -> PcccResult<Option<ReplyValue>> {
        let mode_val = match mode {
            Mode::Program => 0x01,
            Mode::Run => 0x02,
            _ => return Err(unsupported_mode()),
        };
        let i = self.cmd_init(notify, ReplyDecoder::None, dnode, 0x0f, 0x3a)?;
        self.slot_mut(i).buf.put_u8(mode_val);
        self.check_slot_capacity(i, "change mode command")?;
        self.cmd_send(i).await
    }

    /// Change the mode of a SLC processor (CMD 0x0F, FNC 0x80). For a
    /// SLC 5/03 or 5/04 the keyswitch must be in the REM position.
    pub async fn cmd_change_mode_slc500(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        mode: Mode,
    ) -> PcccResult<Option<ReplyValue>> {
        let mode_val = match mode {
            Mode::Program => 0x01,
            Mode::Run => 0x06,
            Mode::TestContinuous => 0x07,
            Mode::TestSingle => 0x08,
            Mode::TestDebug => 0x09,
            _ => return Err(unsupported_mode()),
        };
        let i = self.cmd_init(notify, ReplyDecoder::None, dnode, 0x0f, 0x80)?;
        self.slot_mut(i).buf.put_u8(mode_val);
        self.check_slot_capacity(i, "change mode command")?;
        self.cmd_send(i).await
    }

    /// Set the operating mode at the next I/O scan (CMD 0x0F, FNC 0x3A).
    /// The processor must be in remote mode.
    pub async fn cmd_set_cpu_mode(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        mode: Mode,
    ) -> PcccResult<Option<ReplyValue>> {
        let mode_val = match mode {
            Mode::Program => 0x00,
            Mode::RemoteTest => 0x01,
            Mode::RemoteRun => 0x02,
            _ => return Err(unsupported_mode()),
        };
        let i = self.cmd_init(notify, ReplyDecoder::None, dnode, 0x0f, 0x3a)?;
        self.slot_mut(i).buf.put_u8(mode_val);
        self.check_slot_capacity(i, "set CPU mode command")?;
        self.cmd_send(i).await
    }

    /// Disable I/O forcing; forcing data remains intact (CMD 0x0F,
    /// FNC 0x41).
    pub async fn cmd_disable_forces(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.cmd_init(notify, ReplyDecoder::None, dnode, 0x0f, 0x41)?;
        self.cmd_send(i).await
    }

    /// Determine a SLC data file's type and size (CMD 0x0F, FNC 0x94).
    /// The reply carries [`ReplyValue::FileInfo`].
    pub async fn cmd_read_slc_file_info(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        file_num: u8,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.cmd_init(notify, ReplyDecoder::SlcFileInfo, dnode, 0x0f, 0x94)?;
        {
            let slot = self.slot_mut(i);
            slot.buf.put_u8(0x06); // mask
            slot.buf.put_u8(0x80); // major file type: data table
            slot.buf.put_u8(file_num);
        }
        self.check_slot_capacity(i, "read SLC file info command")?;
        self.cmd_send(i).await
    }

    /// Protected typed logical read with two address fields (CMD 0x0F,
    /// FNC 0xA1). The reply carries [`ReplyValue::Data`].
    pub async fn cmd_protected_typed_logical_read_2(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        file_type: FileType,
        file: u16,
        element: u16,
        elements: usize,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.ptl_init(notify, dnode, 0xa1, file_type, file, element, 0, elements)?;
        self.cmd_send(i).await
    }

    /// Protected typed logical read with three address fields (CMD 0x0F,
    /// FNC 0xA2). Structured sub-element access is not supported, so
    /// `sub_element` must be zero. The reply carries
    /// [`ReplyValue::Data`].
    pub async fn cmd_protected_typed_logical_read_3(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        file_type: FileType,
        file: u16,
        element: u16,
        sub_element: u16,
        elements: usize,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.ptl_init(
            notify,
            dnode,
            0xa2,
            file_type,
            file,
            element,
            sub_element,
            elements,
        )?;
        self.cmd_send(i).await
    }

    /// Protected typed logical write with two address fields (CMD 0x0F,
    /// FNC 0xA9).
    pub async fn cmd_protected_typed_logical_write_2(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        data: &FileData,
        file: u16,
        element: u16,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.ptl_init(
            notify,
            dnode,
            0xa9,
            data.file_type(),
            file,
            element,
            0,
            data.len(),
        )?;
        self.append_write_data(i, data)?;
        self.cmd_send(i).await
    }

    /// Protected typed logical write with three address fields
    /// (CMD 0x0F, FNC 0xAA). `sub_element` must be zero.
    pub async fn cmd_protected_typed_logical_write_3(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        data: &FileData,
        file: u16,
        element: u16,
        sub_element: u16,
    ) -> PcccResult<Option<ReplyValue>> {
        let i = self.ptl_init(
            notify,
            dnode,
            0xaa,
            data.file_type(),
            file,
            element,
            sub_element,
            data.len(),
        )?;
        self.append_write_data(i, data)?;
        self.cmd_send(i).await
    }

    /// Protected typed logical write with mask (CMD 0x0F, FNC 0xAB).
    /// Only word types may be written: integer, binary and status. Bits
    /// set in `mask` are modified in the destination.
    pub async fn cmd_protected_typed_logical_write_with_mask(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        data: &FileData,
        mask: u16,
        file: u16,
        element: u16,
        sub_element: u16,
    ) -> PcccResult<Option<ReplyValue>> {
        match data.file_type() {
            FileType::Int | FileType::Bin | FileType::Stat => {}
            _ => {
                return Err(PcccError::InvalidParameter(
                    "file type not supported".into(),
                ));
            }
        }
        let i = self.ptl_init(
            notify,
            dnode,
            0xab,
            data.file_type(),
            file,
            element,
            sub_element,
            data.len(),
        )?;
        self.slot_mut(i).buf.put_u16_le(mask);
        self.append_write_data(i, data)?;
        self.cmd_send(i).await
    }

    /// Read-modify-write specified words of data table memory
    /// (CMD 0x0F, FNC 0x26). Each set is an address plus the AND and OR
    /// masks to apply to the word it names.
    pub async fn cmd_read_modify_write(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        sets: &[(PlcAddress, u16, u16)],
    ) -> PcccResult<Option<ReplyValue>> {
        if sets.is_empty() {
            return Err(PcccError::InvalidParameter(
                "number of sets must be non-zero".into(),
            ));
        }
        let i = self.cmd_init(notify, ReplyDecoder::None, dnode, 0x0f, 0x26)?;
        for (address, and_mask, or_mask) in sets {
            if let Err(e) = addr::encode_plc_addr(&mut self.slot_mut(i).buf, address) {
                return Err(self.fail_slot(i, e));
            }
            {
                let slot = self.slot_mut(i);
                slot.buf.put_u16_le(*and_mask);
                slot.buf.put_u16_le(*or_mask);
            }
            self.check_slot_capacity(i, "read modify write command")?;
            // Seven header bytes precede the set list.
            if self.slot_mut(i).buf.len() - 7 > RMW_MAX_BYTES {
                return Err(self.fail_slot(
                    i,
                    PcccError::InvalidParameter(
                        "number of sets exceeded maximum command size".into(),
                    ),
                ));
            }
        }
        self.cmd_send(i).await
    }

    /// Modify specified bits in a single word (CMD 0x0F, FNC 0x02). The
    /// set and reset masks must not share bits.
    pub async fn cmd_bit_write(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        address: &PlcAddress,
        set: u16,
        reset: u16,
    ) -> PcccResult<Option<ReplyValue>> {
        if set & reset != 0 {
            return Err(PcccError::InvalidParameter(
                "bits must be mutually exclusive in masks".into(),
            ));
        }
        let i = self.cmd_init(notify, ReplyDecoder::None, dnode, 0x0f, 0x02)?;
        if let Err(e) = addr::encode_plc_addr(&mut self.slot_mut(i).buf, address) {
            return Err(self.fail_slot(i, e));
        }
        {
            let slot = self.slot_mut(i);
            slot.buf.put_u16_le(set);
            slot.buf.put_u16_le(reset);
        }
        self.check_slot_capacity(i, "bit write command")?;
        self.cmd_send(i).await
    }

    /// Common setup for the protected typed logical transfer family.
    #[allow(clippy::too_many_arguments)]
    fn ptl_init(
        &mut self,
        notify: Option<Notify>,
        dnode: u8,
        func: u8,
        file_type: FileType,
        file: u16,
        element: u16,
        sub_element: u16,
        elements: usize,
    ) -> PcccResult<usize> {
        if sub_element != 0 {
            return Err(PcccError::InvalidParameter(
                "nonzero subelement values not supported".into(),
            ));
        }
        let per_element = file_type.wire_size().ok_or_else(|| {
            PcccError::InvalidParameter("file type not supported".into())
        })?;
        let bytes = per_element * elements;
        if bytes > PTL_MAX_BYTES {
            return Err(PcccError::InvalidParameter(format!(
                "too many elements. Data type allows {} elements max",
                PTL_MAX_BYTES / per_element
            )));
        }
        // Write functions carry the data instead of expecting a reply.
        let decoder = if func == 0xa1 || func == 0xa2 {
            ReplyDecoder::TypedRead
        } else {
            ReplyDecoder::None
        };
        let i = self.cmd_init(notify, decoder, dnode, 0x0f, func)?;
        {
            let slot = self.slot_mut(i);
            slot.buf.put_u8(bytes as u8);
            addr::encode_level(&mut slot.buf, file);
            slot.buf.put_u8(file_type.wire_code());
            addr::encode_level(&mut slot.buf, element);
            // Only the three address field functions carry the
            // sub-element.
            if matches!(func, 0xa2 | 0xaa | 0xab) {
                addr::encode_level(&mut slot.buf, sub_element);
            }
            slot.elements = elements;
            slot.bytes = bytes;
            slot.file_type = Some(file_type);
        }
        self.check_slot_capacity(i, "protected typed logical transfer")?;
        Ok(i)
    }

    fn append_write_data(&mut self, i: usize, data: &FileData) -> PcccResult<()> {
        if let Err(e) = data::encode_array(&mut self.slot_mut(i).buf, data) {
            return Err(self.fail_slot(i, e));
        }
        self.check_slot_capacity(i, "typed write data")
    }
}

fn unsupported_mode() -> PcccError {
    PcccError::InvalidParameter("command does not support selected processor mode".into())
}
