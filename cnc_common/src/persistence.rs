//! Checksummed byte-addressable persistence (spec §4.5, §6 "Persistent store").
//!
//! The homing/limit core never touches flash, EEPROM, or a filesystem
//! directly — it is handed an [`NvmStore`] by its caller (the collaborator
//! seam named in spec §2/§6) and only knows how to lay out and checksum
//! records within it. This mirrors the source system's EEPROM layout
//! (version byte, checksummed global-settings blob, `N_COORD` checksummed
//! coordinate vectors, `N_STARTUP_LINE` checksummed startup lines, a
//! checksummed build-info line) without assuming anything about the
//! backing medium.

use heapless::String as HString;
use heapless::Vec as HVec;
use tracing::{error, warn};

use crate::consts::{LINE_BUFFER_SIZE, MAX_AXES, NVM_ADDR_GLOBAL, NVM_ADDR_VERSION, NVM_VERSION};
use crate::error::{RestoreMask, StatusCode};
use crate::settings::MachineSettings;

/// A byte-addressable backing store. Implementors own the actual medium
/// (flash, a file, an in-memory array); this core only ever reads and
/// writes fixed-length byte ranges at caller-computed offsets.
pub trait NvmStore {
    fn read(&self, addr: usize, buf: &mut [u8]);
    fn write(&mut self, addr: usize, buf: &[u8]);
}

/// Largest single record this module ever checksums (the global settings
/// blob, whose encoded length grows with `MAX_AXES`). 6 axes * 5 per-axis
/// f64 arrays alone take 240 bytes; sized with headroom above that.
const MAX_RECORD_LEN: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmError {
    /// The record's checksum did not match its stored data. The backing
    /// range has been cleared to zero so the next read observes a clean
    /// "missing" record rather than re-failing forever.
    RecordMissing,
}

impl From<NvmError> for StatusCode {
    fn from(_: NvmError) -> Self {
        StatusCode::SettingReadFail
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Reads a `len`-byte record plus its trailing checksum byte at `addr`.
/// On mismatch, zeroes the record (data + checksum) and returns
/// [`NvmError::RecordMissing`].
fn read_record<S: NvmStore>(store: &mut S, addr: usize, len: usize) -> Result<HVec<u8, MAX_RECORD_LEN>, NvmError> {
    let mut buf = [0u8; MAX_RECORD_LEN + 1];
    store.read(addr, &mut buf[..len + 1]);
    let (data, sum_byte) = buf[..len + 1].split_at(len);
    if checksum(data) != sum_byte[0] {
        warn!(addr, len, "nvm record checksum mismatch, clearing");
        let zeros = [0u8; MAX_RECORD_LEN + 1];
        store.write(addr, &zeros[..len + 1]);
        return Err(NvmError::RecordMissing);
    }
    let mut out = HVec::new();
    out.extend_from_slice(data).ok();
    Ok(out)
}

/// Writes a `bytes`-length record plus its checksum byte at `addr`.
fn write_record<S: NvmStore>(store: &mut S, addr: usize, bytes: &[u8]) {
    store.write(addr, bytes);
    store.write(addr + bytes.len(), &[checksum(bytes)]);
}

fn global_blob_len(n_axis: usize) -> usize {
    // Fixed-size fields + 5 per-axis f64 arrays, each padded to MAX_AXES
    // so the record length never depends on n_axis (simplifies offsets).
    let _ = n_axis;
    1 + 2 + 1 + 1 + 1 + 1
        + 8 + 8 + 8 + 8
        + 1 + 8 + 8
        + 1 + 8 + 8
        + 1 + 8 + 8 + 2 + 8
        + 2
        + 8 * MAX_AXES * 5
}

fn coord_vector_len() -> usize {
    8 * MAX_AXES
}

fn to_le(buf: &mut HVec<u8, MAX_RECORD_LEN>, bytes: &[u8]) {
    buf.extend_from_slice(bytes).ok();
}

impl MachineSettings {
    /// Encodes this record into its fixed-length NVM byte layout.
    fn to_bytes(&self) -> HVec<u8, MAX_RECORD_LEN> {
        let mut buf = HVec::new();
        to_le(&mut buf, &[self.n_axis]);
        to_le(&mut buf, &self.pulse_microseconds.to_le_bytes());
        to_le(&mut buf, &[self.stepper_idle_lock_time]);
        to_le(&mut buf, &[self.step_invert_mask]);
        to_le(&mut buf, &[self.dir_invert_mask]);
        to_le(&mut buf, &[self.status_report_mask]);
        to_le(&mut buf, &self.junction_deviation.to_le_bytes());
        to_le(&mut buf, &self.arc_tolerance.to_le_bytes());
        to_le(&mut buf, &self.rpm_min.to_le_bytes());
        to_le(&mut buf, &self.rpm_max.to_le_bytes());
        let (has_laser, lo, hi) = match self.laser_range {
            Some((lo, hi)) => (1u8, lo, hi),
            None => (0u8, 0.0, 0.0),
        };
        to_le(&mut buf, &[has_laser]);
        to_le(&mut buf, &lo.to_le_bytes());
        to_le(&mut buf, &hi.to_le_bytes());
        let (has_pwm, plo, phi) = match self.aux_pwm_range {
            Some((lo, hi)) => (1u8, lo, hi),
            None => (0u8, 0.0, 0.0),
        };
        to_le(&mut buf, &[has_pwm]);
        to_le(&mut buf, &plo.to_le_bytes());
        to_le(&mut buf, &phi.to_le_bytes());
        to_le(&mut buf, &[self.homing_dir_mask]);
        to_le(&mut buf, &self.homing_seek_rate.to_le_bytes());
        to_le(&mut buf, &self.homing_feed_rate.to_le_bytes());
        to_le(&mut buf, &self.homing_debounce_delay.to_le_bytes());
        to_le(&mut buf, &self.homing_pulloff.to_le_bytes());
        to_le(&mut buf, &self.flags.bits().to_le_bytes());
        for arr in [&self.steps_per_mm, &self.max_rate, &self.acceleration, &self.max_travel, &self.endstop_adj] {
            for i in 0..MAX_AXES {
                let v = arr.get(i).copied().unwrap_or(0.0);
                to_le(&mut buf, &v.to_le_bytes());
            }
        }
        buf
    }

    /// Decodes a record previously produced by [`Self::to_bytes`].
    fn from_bytes(bytes: &[u8]) -> Self {
        let mut cur = Cursor { bytes, pos: 0 };
        let n_axis = cur.u8();
        let pulse_microseconds = cur.u16();
        let stepper_idle_lock_time = cur.u8();
        let step_invert_mask = cur.u8();
        let dir_invert_mask = cur.u8();
        let status_report_mask = cur.u8();
        let junction_deviation = cur.f64();
        let arc_tolerance = cur.f64();
        let rpm_min = cur.f64();
        let rpm_max = cur.f64();
        let has_laser = cur.u8();
        let laser_lo = cur.f64();
        let laser_hi = cur.f64();
        let laser_range = (has_laser != 0).then_some((laser_lo, laser_hi));
        let has_pwm = cur.u8();
        let pwm_lo = cur.f64();
        let pwm_hi = cur.f64();
        let aux_pwm_range = (has_pwm != 0).then_some((pwm_lo, pwm_hi));
        let homing_dir_mask = cur.u8();
        let homing_seek_rate = cur.f64();
        let homing_feed_rate = cur.f64();
        let homing_debounce_delay = cur.u16();
        let homing_pulloff = cur.f64();
        let flags = crate::settings::MachineFlags::from_bits_truncate(cur.u16());

        let mut read_arr = || {
            let mut v = HVec::new();
            for _ in 0..MAX_AXES {
                let _ = v.push(cur.f64());
            }
            v
        };
        let steps_per_mm = read_arr();
        let max_rate = read_arr();
        let acceleration = read_arr();
        let max_travel = read_arr();
        let endstop_adj = read_arr();

        Self {
            n_axis,
            pulse_microseconds,
            stepper_idle_lock_time,
            step_invert_mask,
            dir_invert_mask,
            status_report_mask,
            junction_deviation,
            arc_tolerance,
            rpm_min,
            rpm_max,
            laser_range,
            aux_pwm_range,
            homing_dir_mask,
            homing_seek_rate,
            homing_feed_rate,
            homing_debounce_delay,
            homing_pulloff,
            steps_per_mm,
            max_rate,
            acceleration,
            max_travel,
            endstop_adj,
            flags,
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> u8 {
        let v = self.bytes[self.pos];
        self.pos += 1;
        v
    }
    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.bytes[self.pos], self.bytes[self.pos + 1]]);
        self.pos += 2;
        v
    }
    fn f64(&mut self) -> f64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.bytes[self.pos..self.pos + 8]);
        self.pos += 8;
        f64::from_le_bytes(b)
    }
}

/// Owns the NVM layout math over an [`NvmStore`]: where the version byte,
/// global settings blob, coordinate vectors, startup lines, and build-info
/// line live, and how to restore subsets of them to a blank state.
pub struct SettingsStore<S: NvmStore> {
    store: S,
    n_axis: u8,
}

impl<S: NvmStore> SettingsStore<S> {
    pub fn new(store: S, n_axis: u8) -> Self {
        Self { store, n_axis }
    }

    fn coord_addr(&self, select: usize) -> usize {
        NVM_ADDR_GLOBAL + global_blob_len(self.n_axis as usize) + 1 + select * (coord_vector_len() + 1)
    }

    fn startup_line_addr(&self, n: usize) -> usize {
        self.coord_addr(crate::consts::N_COORD) + n * (LINE_BUFFER_SIZE + 1)
    }

    fn build_info_addr(&self) -> usize {
        self.startup_line_addr(crate::consts::N_STARTUP_LINE)
    }

    /// Brings the store into a consistent state on boot: if the version
    /// byte doesn't match, the whole record set is treated as absent and
    /// defaults are written out (spec §8 scenario S6).
    pub fn init(&mut self) -> MachineSettings {
        let mut version = [0u8];
        self.store.read(NVM_ADDR_VERSION, &mut version);
        if version[0] != NVM_VERSION {
            warn!(found = version[0], expected = NVM_VERSION, "nvm layout version mismatch, restoring all records");
            self.restore(RestoreMask::ALL);
            self.store.write(NVM_ADDR_VERSION, &[NVM_VERSION]);
            return MachineSettings {
                n_axis: self.n_axis,
                ..MachineSettings::default()
            };
        }
        match self.read_global() {
            Ok(settings) => settings,
            Err(NvmError::RecordMissing) => {
                error!("global settings record missing on boot, restoring defaults");
                let defaults = MachineSettings {
                    n_axis: self.n_axis,
                    ..MachineSettings::default()
                };
                let _ = self.write_global(&defaults);
                defaults
            }
        }
    }

    pub fn read_global(&mut self) -> Result<MachineSettings, NvmError> {
        let len = global_blob_len(self.n_axis as usize);
        let bytes = read_record(&mut self.store, NVM_ADDR_GLOBAL, len)?;
        Ok(MachineSettings::from_bytes(&bytes))
    }

    pub fn write_global(&mut self, settings: &MachineSettings) -> Result<(), NvmError> {
        let bytes = settings.to_bytes();
        write_record(&mut self.store, NVM_ADDR_GLOBAL, &bytes);
        Ok(())
    }

    /// Reads coordinate-system `select` (0-based, G54..G59 + G28/G30 extras
    /// collapse onto the same mechanism) into `out[0..n_axis]`.
    pub fn read_coord_data(&mut self, select: usize, out: &mut [f64]) -> Result<(), NvmError> {
        let addr = self.coord_addr(select);
        let bytes = read_record(&mut self.store, addr, coord_vector_len())?;
        for (i, slot) in out.iter_mut().enumerate().take(self.n_axis as usize) {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            *slot = f64::from_le_bytes(b);
        }
        Ok(())
    }

    pub fn write_coord_data(&mut self, select: usize, data: &[f64]) -> Result<(), NvmError> {
        let addr = self.coord_addr(select);
        let mut bytes = HVec::<u8, MAX_RECORD_LEN>::new();
        for i in 0..MAX_AXES {
            let v = data.get(i).copied().unwrap_or(0.0);
            to_le(&mut bytes, &v.to_le_bytes());
        }
        write_record(&mut self.store, addr, &bytes);
        Ok(())
    }

    pub fn read_startup_line(&mut self, n: usize) -> Result<HString<LINE_BUFFER_SIZE>, NvmError> {
        let addr = self.startup_line_addr(n);
        let bytes = read_record(&mut self.store, addr, LINE_BUFFER_SIZE)?;
        Ok(decode_line(&bytes))
    }

    pub fn store_startup_line(&mut self, n: usize, text: &str) -> Result<(), NvmError> {
        let addr = self.startup_line_addr(n);
        write_record(&mut self.store, addr, &encode_line(text));
        Ok(())
    }

    pub fn read_build_info(&mut self) -> Result<HString<LINE_BUFFER_SIZE>, NvmError> {
        let addr = self.build_info_addr();
        let bytes = read_record(&mut self.store, addr, LINE_BUFFER_SIZE)?;
        Ok(decode_line(&bytes))
    }

    pub fn store_build_info(&mut self, text: &str) -> Result<(), NvmError> {
        let addr = self.build_info_addr();
        write_record(&mut self.store, addr, &encode_line(text));
        Ok(())
    }

    /// Clears or resets the subsets named by `mask` (spec §4.5 "Restore").
    pub fn restore(&mut self, mask: RestoreMask) {
        if mask.contains(RestoreMask::DEFAULTS) {
            let defaults = MachineSettings {
                n_axis: self.n_axis,
                ..MachineSettings::default()
            };
            let _ = self.write_global(&defaults);
        }
        if mask.contains(RestoreMask::PARAMETERS) {
            for select in 0..crate::consts::N_COORD {
                let zeros = [0.0f64; MAX_AXES];
                let _ = self.write_coord_data(select, &zeros);
            }
        }
        if mask.contains(RestoreMask::STARTUP_LINES) {
            for n in 0..crate::consts::N_STARTUP_LINE {
                let _ = self.store_startup_line(n, "");
            }
        }
        if mask.contains(RestoreMask::BUILD_INFO) {
            let _ = self.store_build_info("");
        }
    }
}

fn encode_line(text: &str) -> HVec<u8, MAX_RECORD_LEN> {
    let mut buf = HVec::new();
    let truncated = &text.as_bytes()[..text.len().min(LINE_BUFFER_SIZE - 1)];
    to_le(&mut buf, truncated);
    for _ in truncated.len()..LINE_BUFFER_SIZE {
        to_le(&mut buf, &[0u8]);
    }
    buf
}

fn decode_line(bytes: &[u8]) -> HString<LINE_BUFFER_SIZE> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let mut s = HString::new();
    if let Ok(text) = core::str::from_utf8(&bytes[..end]) {
        let _ = s.push_str(text);
    }
    s
}

/// An in-memory [`NvmStore`] for tests and the demo binary.
#[derive(Debug, Default, Clone)]
pub struct MemoryNvm {
    bytes: std::vec::Vec<u8>,
}

impl MemoryNvm {
    pub fn new(size: usize) -> Self {
        Self { bytes: std::vec![0u8; size] }
    }
}

impl NvmStore for MemoryNvm {
    fn read(&self, addr: usize, buf: &mut [u8]) {
        if addr + buf.len() > self.bytes.len() {
            buf.fill(0);
            return;
        }
        buf.copy_from_slice(&self.bytes[addr..addr + buf.len()]);
    }

    fn write(&mut self, addr: usize, buf: &[u8]) {
        if addr + buf.len() > self.bytes.len() {
            self.bytes.resize(addr + buf.len(), 0);
        }
        self.bytes[addr..addr + buf.len()].copy_from_slice(buf);
    }
}

/// A file-backed [`NvmStore`]: persists across process restarts, unlike
/// [`MemoryNvm`]'s volatile test double. Reads past the current file
/// length return zero, the same never-written-space behavior flash/EEPROM
/// gives; writes past the current length grow the file, zero-filling the
/// gap.
pub struct FileNvm {
    file: std::fs::File,
}

impl FileNvm {
    /// Opens (creating if absent) the file at `path` for use as an NVM
    /// backing store.
    pub fn open(path: &std::path::Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        Ok(Self { file })
    }
}

impl NvmStore for FileNvm {
    fn read(&self, addr: usize, buf: &mut [u8]) {
        use std::io::{Read, Seek, SeekFrom};
        buf.fill(0);
        let mut file = &self.file;
        if file.seek(SeekFrom::Start(addr as u64)).is_err() {
            return;
        }
        // Short reads (the file is shorter than `addr + buf.len()`) leave
        // the unread tail at the zero `buf` was just filled with.
        let _ = file.read(buf);
    }

    fn write(&mut self, addr: usize, buf: &[u8]) {
        use std::io::{Seek, SeekFrom, Write};
        if self.file.seek(SeekFrom::Start(addr as u64)).is_err() {
            return;
        }
        let _ = self.file.write_all(buf);
    }
}
