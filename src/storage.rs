use alloc::vec::Vec;

use embassy_sync::{blocking_mutex::raw::NoopRawMutex, mutex::Mutex};
use embedded_storage::{ReadStorage, Storage};
use esp_storage::{FlashStorage, FlashStorageError};

use esp32_event_counter::config::ConfigMedium;

const DOC_MAGIC: [u8; 4] = *b"EVC1";

#[derive(Debug)]
pub enum Error {
    Busy,
    NoDocument,
    #[allow(dead_code)]
    DocumentTooLarge(usize),
    #[allow(dead_code)]
    Flash(FlashStorageError),
}

/// Configuration document region in internal flash. The document is
/// framed as magic + little-endian length + JSON bytes; esp-storage
/// does the sector read-modify-write underneath. A blank or stale
/// region reads as no document, which the config layer treats as
/// all-defaults. The flash handle is shared with the firmware update
/// service; a document operation landing in the middle of an update
/// reports busy and the caller degrades.
pub struct FlashRegion {
    flash: &'static Mutex<NoopRawMutex, FlashStorage<'static>>,
    offset: u32,
    capacity: usize,
}

impl FlashRegion {
    pub fn new(
        flash: &'static Mutex<NoopRawMutex, FlashStorage<'static>>,
        offset: u32,
        capacity: usize,
    ) -> Self {
        Self {
            flash,
            offset,
            capacity,
        }
    }
}

impl ConfigMedium for FlashRegion {
    type Error = Error;

    fn read_document(&mut self) -> Result<Vec<u8>, Error> {
        let mut flash = self.flash.try_lock().map_err(|_| Error::Busy)?;

        let mut header = [0u8; 8];
        flash
            .read(self.offset, &mut header)
            .map_err(Error::Flash)?;
        if header[..4] != DOC_MAGIC {
            return Err(Error::NoDocument);
        }
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if len > self.capacity - 8 {
            return Err(Error::NoDocument);
        }
        let mut doc = alloc::vec![0u8; len];
        flash
            .read(self.offset + 8, &mut doc)
            .map_err(Error::Flash)?;
        Ok(doc)
    }

    fn write_document(&mut self, doc: &[u8]) -> Result<(), Error> {
        if 8 + doc.len() > self.capacity {
            return Err(Error::DocumentTooLarge(doc.len()));
        }
        let mut flash = self.flash.try_lock().map_err(|_| Error::Busy)?;

        let mut framed = Vec::with_capacity(8 + doc.len());
        framed.extend_from_slice(&DOC_MAGIC);
        framed.extend_from_slice(&(doc.len() as u32).to_le_bytes());
        framed.extend_from_slice(doc);
        flash.write(self.offset, &framed).map_err(Error::Flash)
    }
}
