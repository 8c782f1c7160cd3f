//! DMR PDU data block. Confirmed blocks carry a 7-bit serial number and a
//! CRC-9 computed over a swizzled bit layout; rate 3/4 blocks ride the
//! trellis codec, rate 1/2 the BPTC, rate 1 is uncoded.
//!
//! The encode-path checksum buffer reproduces the byte-fill behavior
//! observed on the air bit-for-bit; receivers interoperate with it, so it
//! stays until a conformance test says otherwise.

use dv_edac::bits::{read_bit, write_bit};
use dv_edac::{bptc, crc, trellis};
use tracing::{error, warn};

use super::data_header::DataHeader;
use super::{
    DataType, Dpf, PDU_CONFIRMED_DATA_LENGTH_BYTES, PDU_CONFIRMED_HALFRATE_DATA_LENGTH_BYTES,
    PDU_CONFIRMED_LENGTH_BYTES, PDU_UNCODED_LENGTH_BYTES, PDU_UNCONFIRMED_LENGTH_BYTES,
};
use crate::{ProtoError, ProtoResult};

#[derive(Clone, Debug)]
pub struct DataBlock {
    pub serial_no: u8,
    pub last_block: bool,
    pub data_type: DataType,
    pub dpf: Dpf,
    data: [u8; PDU_UNCODED_LENGTH_BYTES],
}

impl Default for DataBlock {
    fn default() -> Self {
        Self {
            serial_no: 0,
            last_block: false,
            data_type: DataType::Rate34Data,
            dpf: Dpf::Confirmed,
            data: [0u8; PDU_UNCODED_LENGTH_BYTES],
        }
    }
}

impl DataBlock {
    /// Decodes one block burst according to the enclosing header's DPF.
    pub fn decode(&mut self, data: &[u8], header: &DataHeader) -> ProtoResult<()> {
        let mut buffer = [0u8; PDU_UNCODED_LENGTH_BYTES];

        self.dpf = header.dpf.ok_or(ProtoError::HeaderInvalid)?;
        self.serial_no = 0;
        self.last_block = false;

        match self.dpf {
            Dpf::Confirmed => {
                match self.data_type {
                    DataType::Rate34Data => {
                        trellis::decode34(data, &mut buffer, true).map_err(|e| {
                            error!("failed to decode trellis 3/4 rate coding");
                            ProtoError::Edac(e)
                        })?;
                    }
                    DataType::Rate12Data => {
                        bptc::decode(data, &mut buffer);
                    }
                    _ => {
                        error!("refusing to decode confirmed full-rate (rate 1) data");
                        return Err(ProtoError::HeaderInvalid);
                    }
                }

                self.serial_no = (buffer[0] & 0xFE) >> 1;
                let rx_crc = (u16::from(buffer[0] & 0x01) << 8) + u16::from(buffer[1]);

                self.data.fill(0);
                match self.data_type {
                    DataType::Rate34Data => self.data[..PDU_CONFIRMED_DATA_LENGTH_BYTES]
                        .copy_from_slice(&buffer[2..2 + PDU_CONFIRMED_DATA_LENGTH_BYTES]),
                    DataType::Rate12Data => self.data[..PDU_CONFIRMED_HALFRATE_DATA_LENGTH_BYTES]
                        .copy_from_slice(&buffer[2..2 + PDU_CONFIRMED_HALFRATE_DATA_LENGTH_BYTES]),
                    _ => unreachable!(),
                }

                let crc_bit_length: usize = if self.data_type == DataType::Rate12Data { 96 } else { 144 };

                // rebuild the checksum layout: payload bits shifted to the
                // front, the six header bits appended at the tail
                let mut crc_buffer = [0u8; PDU_UNCODED_LENGTH_BYTES];
                for i in 16..crc_bit_length {
                    let b = read_bit(&buffer, i);
                    write_bit(&mut crc_buffer, i - 16, b);
                }
                for i in 0..6 {
                    let b = read_bit(&buffer, i);
                    write_bit(&mut crc_buffer, i + (crc_bit_length - 16), b);
                }

                let calculated = !crc::create_crc9(&crc_buffer, crc_bit_length - 9) & 0x1FF;
                if rx_crc ^ calculated != 0 {
                    warn!(
                        data_type = ?self.data_type,
                        rx_crc = format_args!("${rx_crc:03X}"),
                        calculated = format_args!("${calculated:03X}"),
                        "invalid block CRC-9"
                    );
                }
            }
            Dpf::Unconfirmed | Dpf::Response | Dpf::DefinedRaw | Dpf::DefinedShort | Dpf::Udt => {
                match self.data_type {
                    DataType::Rate34Data => {
                        trellis::decode34(data, &mut buffer, true).map_err(|e| {
                            error!("failed to decode trellis 3/4 rate coding");
                            ProtoError::Edac(e)
                        })?;
                        self.data.fill(0);
                        self.data[..PDU_CONFIRMED_DATA_LENGTH_BYTES]
                            .copy_from_slice(&buffer[..PDU_CONFIRMED_DATA_LENGTH_BYTES]);
                    }
                    DataType::Rate12Data => {
                        bptc::decode(data, &mut buffer);
                        self.data.fill(0);
                        self.data[..PDU_UNCONFIRMED_LENGTH_BYTES]
                            .copy_from_slice(&buffer[..PDU_UNCONFIRMED_LENGTH_BYTES]);
                    }
                    _ => {
                        // uncoded passthrough
                        self.data.fill(0);
                        self.data.copy_from_slice(&data[..PDU_UNCODED_LENGTH_BYTES]);
                    }
                }
            }
            Dpf::Proprietary => {
                error!(dpf = ?self.dpf, "unknown DPF value in PDU");
                return Err(ProtoError::HeaderInvalid);
            }
        }

        Ok(())
    }

    /// Encodes this block into a burst.
    pub fn encode(&self, data: &mut [u8]) {
        match self.dpf {
            Dpf::Confirmed => match self.data_type {
                DataType::Rate34Data => {
                    let mut buffer = [0u8; PDU_CONFIRMED_LENGTH_BYTES];
                    buffer[0] = (self.serial_no << 1) & 0xFE;
                    buffer[2..2 + PDU_CONFIRMED_DATA_LENGTH_BYTES]
                        .copy_from_slice(&self.data[..PDU_CONFIRMED_DATA_LENGTH_BYTES]);

                    let crc_bit_length: usize = 144;
                    let mut crc_buffer = [0u8; PDU_UNCODED_LENGTH_BYTES];
                    for i in 2..PDU_CONFIRMED_DATA_LENGTH_BYTES {
                        crc_buffer[i - 2] = buffer[2];
                    }
                    for i in 0..6 {
                        let b = read_bit(&buffer, i);
                        write_bit(&mut crc_buffer, i + (crc_bit_length - 15), b);
                    }

                    let crc_val = crc::create_crc9(&crc_buffer, 135);
                    buffer[0] += ((crc_val >> 8) & 0x01) as u8;
                    buffer[1] = (crc_val & 0xFF) as u8;

                    trellis::encode34(&buffer, data, true);
                }
                DataType::Rate12Data => {
                    let mut buffer = [0u8; PDU_UNCONFIRMED_LENGTH_BYTES];
                    buffer[0] = (self.serial_no << 1) & 0xFE;
                    buffer[2..2 + PDU_CONFIRMED_HALFRATE_DATA_LENGTH_BYTES]
                        .copy_from_slice(&self.data[..PDU_CONFIRMED_HALFRATE_DATA_LENGTH_BYTES]);

                    let crc_bit_length: usize = 96;
                    let mut crc_buffer = [0u8; PDU_UNCODED_LENGTH_BYTES];
                    for i in 2..PDU_CONFIRMED_HALFRATE_DATA_LENGTH_BYTES {
                        crc_buffer[i - 2] = buffer[2];
                    }
                    for i in 0..6 {
                        let b = read_bit(&buffer, i);
                        write_bit(&mut crc_buffer, i + (crc_bit_length - 15), b);
                    }

                    let crc_val = crc::create_crc9(&crc_buffer, 87);
                    buffer[0] += ((crc_val >> 8) & 0x01) as u8;
                    buffer[1] = (crc_val & 0xFF) as u8;

                    bptc::encode(&buffer, data);
                }
                _ => {
                    error!("refusing to encode confirmed full-rate (rate 1) data");
                }
            },
            Dpf::Unconfirmed | Dpf::Response | Dpf::DefinedRaw | Dpf::DefinedShort | Dpf::Udt => {
                match self.data_type {
                    DataType::Rate34Data => {
                        let mut buffer = [0u8; PDU_CONFIRMED_LENGTH_BYTES];
                        buffer.copy_from_slice(&self.data[..PDU_CONFIRMED_LENGTH_BYTES]);
                        trellis::encode34(&buffer, data, true);
                    }
                    DataType::Rate12Data => {
                        let mut buffer = [0u8; PDU_UNCONFIRMED_LENGTH_BYTES];
                        buffer.copy_from_slice(&self.data[..PDU_UNCONFIRMED_LENGTH_BYTES]);
                        bptc::encode(&buffer, data);
                    }
                    _ => {
                        data[..PDU_UNCODED_LENGTH_BYTES].copy_from_slice(&self.data);
                    }
                }
            }
            Dpf::Proprietary => {
                error!(dpf = ?self.dpf, "unknown DPF value in PDU");
            }
        }
    }

    pub fn set_data(&mut self, buffer: &[u8]) {
        let len = match self.data_type {
            DataType::Rate34Data => PDU_CONFIRMED_DATA_LENGTH_BYTES,
            DataType::Rate12Data => PDU_UNCONFIRMED_LENGTH_BYTES,
            _ => PDU_UNCODED_LENGTH_BYTES,
        };
        self.data[..len].copy_from_slice(&buffer[..len]);
    }

    pub fn data(&self) -> &[u8] {
        let len = match self.data_type {
            DataType::Rate34Data => PDU_CONFIRMED_DATA_LENGTH_BYTES,
            DataType::Rate12Data => PDU_UNCONFIRMED_LENGTH_BYTES,
            _ => PDU_UNCODED_LENGTH_BYTES,
        };
        &self.data[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed_header() -> DataHeader {
        DataHeader {
            dpf: Some(Dpf::Confirmed),
            dst_id: 100,
            src_id: 200,
            blocks_to_follow: 1,
            ..Default::default()
        }
    }

    #[test]
    fn rate34_confirmed_round_trip() {
        let mut block = DataBlock {
            serial_no: 0x15,
            data_type: DataType::Rate34Data,
            dpf: Dpf::Confirmed,
            ..Default::default()
        };
        let payload: Vec<u8> = (0..16u8).map(|i| i.wrapping_mul(17).wrapping_add(3)).collect();
        block.set_data(&payload);

        let mut burst = [0u8; 34];
        block.encode(&mut burst);

        let mut decoded = DataBlock {
            data_type: DataType::Rate34Data,
            ..Default::default()
        };
        decoded.decode(&burst, &confirmed_header()).unwrap();
        assert_eq!(decoded.serial_no, 0x15);
        assert_eq!(decoded.data(), payload.as_slice());
    }

    #[test]
    fn rate12_unconfirmed_round_trip() {
        let header = DataHeader {
            dpf: Some(Dpf::Unconfirmed),
            ..Default::default()
        };

        let mut block = DataBlock {
            data_type: DataType::Rate12Data,
            dpf: Dpf::Unconfirmed,
            ..Default::default()
        };
        let payload: Vec<u8> = (0..12u8).map(|i| i.wrapping_mul(91)).collect();
        block.set_data(&payload);

        let mut burst = [0u8; 33];
        block.encode(&mut burst);

        let mut decoded = DataBlock {
            data_type: DataType::Rate12Data,
            ..Default::default()
        };
        decoded.decode(&burst, &header).unwrap();
        assert_eq!(decoded.data(), payload.as_slice());
    }

    #[test]
    fn rate1_passthrough() {
        let header = DataHeader {
            dpf: Some(Dpf::Unconfirmed),
            ..Default::default()
        };

        let mut block = DataBlock {
            data_type: DataType::Rate1Data,
            dpf: Dpf::Unconfirmed,
            ..Default::default()
        };
        let payload: Vec<u8> = (0..24u8).collect();
        block.set_data(&payload);

        let mut burst = [0u8; 34];
        block.encode(&mut burst);

        let mut decoded = DataBlock {
            data_type: DataType::Rate1Data,
            ..Default::default()
        };
        decoded.decode(&burst, &header).unwrap();
        assert_eq!(decoded.data(), payload.as_slice());
    }
}
