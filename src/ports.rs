/*!
  The peripheral ports the execution engine calls into but does not implement.

  Rasterization, window presentation, and keyboard sampling live on the other
  side of these traits. The machine owns the only references and calls them
  synchronously from the run loop, so no implementation needs interior locking.

  The block device is the one port with a concrete production adapter here:
  `FileBlockDevice` maps each drive to a flat file named `drive<N>.bin` in its
  root directory. Logical layout is sector-major: file offset =
  sector * 255 + byte offset, sectors 0-15, offsets 0-254.
*/

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use num_enum::TryFromPrimitive;

/// Cells per sector on a block device.
pub const SECTOR_SIZE: u64 = 255;

/// Display surface mode selected by the display-init interrupt.
#[derive(TryFromPrimitive, Clone, Copy, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum DisplayMode {
  Pixel = 0,
  Text  = 1,
}

/// Pixel/text output surface. Coordinates are pre-validated by the machine.
pub trait DisplayPort {
  fn init(&mut self, mode: DisplayMode, width: u32, height: u32);
  fn set_pixel(&mut self, x: u32, y: u32, color: u32);
  /// `cell_index` is a row-major character cell, already clamped by the machine.
  fn draw_char(&mut self, cell_index: u32, ch: u8, color: u32);
  fn present(&mut self);
  /// Sampled once per run-loop iteration while a display is active.
  fn poll_quit(&mut self) -> bool {
    false
  }
}

/// Non-blocking keyboard state. Returns every currently held keycode.
pub trait InputPort {
  fn pressed_keycodes(&mut self) -> Vec<u32>;
}

/// Persistent sector-addressed storage, one logical drive per index.
pub trait BlockDevice {
  fn exists(&self, drive: u8) -> bool;
  fn read_byte(&mut self, drive: u8, sector: u8, offset: u8) -> io::Result<u8>;
  fn write_byte(&mut self, drive: u8, sector: u8, offset: u8, value: u8) -> io::Result<()>;
}

/// A display that swallows everything. The headless default.
#[derive(Default)]
pub struct NullDisplay;

impl DisplayPort for NullDisplay {
  fn init(&mut self, _mode: DisplayMode, _width: u32, _height: u32) {}
  fn set_pixel(&mut self, _x: u32, _y: u32, _color: u32) {}
  fn draw_char(&mut self, _cell_index: u32, _ch: u8, _color: u32) {}
  fn present(&mut self) {}
}

/// A keyboard with no keys. The headless default.
#[derive(Default)]
pub struct NullInput;

impl InputPort for NullInput {
  fn pressed_keycodes(&mut self) -> Vec<u32> {
    vec![]
  }
}

/// File-backed drives, `drive<N>.bin` under `root`.
pub struct FileBlockDevice {
  root: PathBuf,
}

impl FileBlockDevice {
  pub fn new(root: impl Into<PathBuf>) -> FileBlockDevice {
    FileBlockDevice { root: root.into() }
  }

  fn drive_path(&self, drive: u8) -> PathBuf {
    self.root.join(format!("drive{}.bin", drive))
  }

  fn position(sector: u8, offset: u8) -> u64 {
    sector as u64 * SECTOR_SIZE + offset as u64
  }
}

impl BlockDevice for FileBlockDevice {
  fn exists(&self, drive: u8) -> bool {
    self.drive_path(drive).exists()
  }

  fn read_byte(&mut self, drive: u8, sector: u8, offset: u8) -> io::Result<u8> {
    let mut file = File::open(self.drive_path(drive))?;
    file.seek(SeekFrom::Start(Self::position(sector, offset)))?;
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte)?;
    Ok(byte[0])
  }

  fn write_byte(&mut self, drive: u8, sector: u8, offset: u8, value: u8) -> io::Result<()> {
    let mut file = OpenOptions::new()
      .read(true)
      .write(true)
      .open(self.drive_path(drive))?;
    file.seek(SeekFrom::Start(Self::position(sector, offset)))?;
    file.write_all(&[value])
  }
}

/// RAM-backed drives. Handy for tests and for running programs with no disk files.
pub struct MemBlockDevice {
  drives: Vec<Vec<u8>>,
}

impl MemBlockDevice {
  /// Creates `count` zero-filled drives, 16 sectors each.
  pub fn new(count: usize) -> MemBlockDevice {
    MemBlockDevice {
      drives: vec![vec![0u8; (SECTOR_SIZE * 16) as usize]; count],
    }
  }

  fn index(sector: u8, offset: u8) -> usize {
    (sector as u64 * SECTOR_SIZE + offset as u64) as usize
  }
}

impl BlockDevice for MemBlockDevice {
  fn exists(&self, drive: u8) -> bool {
    (drive as usize) < self.drives.len()
  }

  fn read_byte(&mut self, drive: u8, sector: u8, offset: u8) -> io::Result<u8> {
    self
      .drives
      .get(drive as usize)
      .and_then(|d| d.get(Self::index(sector, offset)).copied())
      .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "read past drive end"))
  }

  fn write_byte(&mut self, drive: u8, sector: u8, offset: u8, value: u8) -> io::Result<()> {
    let slot = self
      .drives
      .get_mut(drive as usize)
      .and_then(|d| d.get_mut(Self::index(sector, offset)))
      .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "write past drive end"))?;
    *slot = value;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::convert::TryFrom;

  use super::*;

  #[test]
  fn display_mode_decodes_zero_and_one_only() {
    assert_eq!(DisplayMode::try_from(0u8), Ok(DisplayMode::Pixel));
    assert_eq!(DisplayMode::try_from(1u8), Ok(DisplayMode::Text));
    assert!(DisplayMode::try_from(2u8).is_err());
  }

  #[test]
  fn mem_block_device_round_trips_a_byte() {
    let mut device = MemBlockDevice::new(2);
    device.write_byte(1, 3, 17, 0xAB).unwrap();
    assert_eq!(device.read_byte(1, 3, 17).unwrap(), 0xAB);
    assert_eq!(device.read_byte(1, 3, 18).unwrap(), 0);
  }

  #[test]
  fn mem_block_device_reports_existing_drives() {
    let device = MemBlockDevice::new(2);
    assert!(device.exists(0));
    assert!(device.exists(1));
    assert!(!device.exists(2));
  }

  #[test]
  fn sector_major_layout_uses_255_byte_sectors() {
    assert_eq!(FileBlockDevice::position(0, 0), 0);
    assert_eq!(FileBlockDevice::position(1, 0), 255);
    assert_eq!(FileBlockDevice::position(2, 10), 520);
  }
}
