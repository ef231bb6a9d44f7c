//! Decoder for EEPROM-emulation logs held in raw dataflash dumps.
//!
//! Automotive ECUs rarely carry a discrete EEPROM; a flash-abstraction
//! library journals small records into a ring of dataflash blocks instead.
//! Given a flat dump of that region, this crate rediscovers the block
//! structure, orders the blocks by erase generation, and reconstructs the
//! newest value of every emulated record. The on-flash layouts are
//! described in [`eeprom`].

pub mod codec;
pub mod eeprom;
pub mod image;
pub mod report;
