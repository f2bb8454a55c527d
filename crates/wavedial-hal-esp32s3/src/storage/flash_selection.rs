use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use esp_rom_sys::rom::spiflash::{
    ESP_ROM_SPIFLASH_RESULT_OK, esp_rom_spiflash_erase_sector, esp_rom_spiflash_read,
    esp_rom_spiflash_unlock, esp_rom_spiflash_write,
};
use log::warn;
use wavedial_core::selection::SelectionStore;

const FLASH_SECTOR_SIZE: u32 = 4096;
const DEFAULT_FLASH_CAPACITY_BYTES: usize = 16 * 1024 * 1024;

const RECORD_MAGIC: u32 = 0x3144_5657; // "WVD1"
const RECORD_VERSION: u8 = 1;
// magic + version + index + padding, then the checksum word.
const RECORD_LEN: usize = 12;
const RECORD_CHECKSUM_OFFSET: usize = 8;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashSelectionError {
    PartitionTable,
    PartitionMissing,
    PartitionTooSmall,
    FlashOpFailed(i32),
    Unsupported,
}

/// Word-granular access to the SPI flash through the ROM routines. The
/// selection record is the only thing ever written through this path.
#[derive(Debug)]
struct RawFlash;

impl RawFlash {
    fn new() -> Result<Self, FlashSelectionError> {
        let rc = unsafe { esp_rom_spiflash_unlock() };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashSelectionError::FlashOpFailed(rc));
        }
        Ok(Self)
    }

    fn erase_sector(&mut self, sector_addr: u32) -> Result<(), FlashSelectionError> {
        if !sector_addr.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(FlashSelectionError::Unsupported);
        }

        let rc = unsafe { esp_rom_spiflash_erase_sector(sector_addr / FLASH_SECTOR_SIZE) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashSelectionError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, FlashSelectionError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashSelectionError::Unsupported);
        }

        let mut word = 0u32;
        let rc = unsafe { esp_rom_spiflash_read(addr, &mut word as *mut u32 as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashSelectionError::FlashOpFailed(rc));
        }
        Ok(word)
    }

    fn write_word(&mut self, addr: u32, word: u32) -> Result<(), FlashSelectionError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashSelectionError::Unsupported);
        }

        let rc = unsafe { esp_rom_spiflash_write(addr, &word as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashSelectionError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn read_bytes(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashSelectionError> {
        if out.is_empty() {
            return Ok(());
        }

        let mut word_addr = addr & !0b11;
        let mut skip = (addr - word_addr) as usize;
        let mut filled = 0usize;

        while filled < out.len() {
            let bytes = self.read_word(word_addr)?.to_le_bytes();
            for byte in bytes.iter().skip(skip) {
                if filled == out.len() {
                    break;
                }
                out[filled] = *byte;
                filled += 1;
            }
            skip = 0;
            word_addr += 4;
        }

        Ok(())
    }

    /// Write a word-aligned, word-sized record into an erased sector.
    fn write_record(
        &mut self,
        addr: u32,
        record: &[u8; RECORD_LEN],
    ) -> Result<(), FlashSelectionError> {
        for (i, chunk) in record.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.write_word(addr + (i as u32) * 4, word)?;
        }
        Ok(())
    }
}

impl ReadStorage for RawFlash {
    type Error = FlashSelectionError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.read_bytes(offset, bytes)
    }

    fn capacity(&self) -> usize {
        DEFAULT_FLASH_CAPACITY_BYTES
    }
}

impl Storage for RawFlash {
    fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), Self::Error> {
        Err(FlashSelectionError::Unsupported)
    }
}

/// Persisted station index in the last sector of a writable data partition.
///
/// One checksummed record holds the single index byte; an erased or foreign
/// sector loads as "nothing stored" and the caller falls back to station 0.
#[derive(Debug)]
pub struct FlashSelectionStore {
    flash: RawFlash,
    record_addr: u32,
}

impl FlashSelectionStore {
    pub fn new() -> Result<Self, FlashSelectionError> {
        let mut flash = RawFlash::new()?;

        let mut table_buf = [0u8; PARTITION_TABLE_MAX_LEN];
        let table = read_partition_table(&mut flash, &mut table_buf)
            .map_err(|_| FlashSelectionError::PartitionTable)?;

        // Prefer an undefined data partition; fall back to NVS space the
        // esp-idf partition layouts always carry.
        let mut chosen: Option<(u32, u32)> = None;
        for entry in table.iter() {
            if entry.is_read_only() || entry.len() < FLASH_SECTOR_SIZE {
                continue;
            }

            match entry.partition_type() {
                PartitionType::Data(DataPartitionSubType::Undefined) => {
                    chosen = Some((entry.offset(), entry.len()));
                    break;
                }
                PartitionType::Data(DataPartitionSubType::Nvs) if chosen.is_none() => {
                    chosen = Some((entry.offset(), entry.len()));
                }
                _ => {}
            }
        }

        let (offset, len) = chosen.ok_or(FlashSelectionError::PartitionMissing)?;
        if len < FLASH_SECTOR_SIZE {
            return Err(FlashSelectionError::PartitionTooSmall);
        }

        Ok(Self {
            flash,
            record_addr: offset + len - FLASH_SECTOR_SIZE,
        })
    }
}

impl SelectionStore for FlashSelectionStore {
    type Error = FlashSelectionError;

    fn load(&mut self) -> Result<Option<u8>, Self::Error> {
        let mut record = [0u8; RECORD_LEN];
        self.flash.read_bytes(self.record_addr, &mut record)?;

        if record.iter().all(|byte| *byte == 0xFF) {
            return Ok(None);
        }

        let magic = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        if magic != RECORD_MAGIC || record[4] != RECORD_VERSION {
            return Ok(None);
        }

        let expected = u32::from_le_bytes([record[8], record[9], record[10], record[11]]);
        if checksum32(&record[..RECORD_CHECKSUM_OFFSET]) != expected {
            warn!("selection record checksum mismatch; ignoring stored value");
            return Ok(None);
        }

        Ok(Some(record[5]))
    }

    fn save(&mut self, index: u8) -> Result<(), Self::Error> {
        let mut record = [0u8; RECORD_LEN];
        record[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        record[4] = RECORD_VERSION;
        record[5] = index;
        let checksum = checksum32(&record[..RECORD_CHECKSUM_OFFSET]);
        record[8..12].copy_from_slice(&checksum.to_le_bytes());

        self.flash.erase_sector(self.record_addr)?;
        self.flash.write_record(self.record_addr, &record)
    }
}

fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C_9DC5u32;
    for byte in bytes {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
