//! The image loader boundary.
//!
//! ROM and executable parsing happen outside the core; the loader hands
//! back flattened images the kernel can map directly.

use anyhow::{anyhow, Result};

use karst_fs::{RomManifest, Vfs};
use karst_kernel::LoadedImage;
use karst_mem::GuestAddr;

/// A parsed ROM image: the byte blob to map plus its file manifest.
#[derive(Debug, Clone, Default)]
pub struct RomImage {
    /// Guest base address the image expects to be mapped at.
    pub base: GuestAddr,
    /// The raw image, mapped execute-in-place.
    pub data: Vec<u8>,
    /// Files contained in the image.
    pub manifest: RomManifest,
}

/// The external loader the emulator consumes.
pub trait ImageLoader {
    /// Resolves and parses a guest executable.
    ///
    /// `path` is resolved case-insensitively through the VFS, so the
    /// loader can pull the binary from ROM or any mounted drive.
    fn load_executable(&mut self, vfs: &mut Vfs, path: &str) -> Result<LoadedImage>;

    /// Parses a ROM image from a host file.
    fn load_rom(&mut self, host_path: &str) -> Result<RomImage>;
}

/// A loader serving canned images from memory.
///
/// Front-ends without a real parser (and the test suites) register
/// images by path; lookups are case-insensitive like every guest path.
#[derive(Default)]
pub struct StubLoader {
    images: Vec<(String, LoadedImage)>,
    rom: Option<RomImage>,
}

impl StubLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executable image.
    pub fn add_image(&mut self, image: LoadedImage) {
        self.images.push((image.path.clone(), image));
    }

    /// Registers the ROM image returned by [`ImageLoader::load_rom`].
    pub fn set_rom(&mut self, rom: RomImage) {
        self.rom = Some(rom);
    }

    /// A minimal runnable image for a path: four bytes of code, default
    /// stack.
    pub fn trivial_image(path: &str) -> LoadedImage {
        LoadedImage {
            uids: Default::default(),
            path: path.to_owned(),
            code: vec![0; 4],
            data: Vec::new(),
            bss_size: 0,
            entry_offset: 0,
            stack_size: 0x2000,
        }
    }
}

impl ImageLoader for StubLoader {
    fn load_executable(&mut self, _vfs: &mut Vfs, path: &str) -> Result<LoadedImage> {
        self.images
            .iter()
            .find(|(p, _)| karst_fs::path::eq(p, path))
            .map(|(_, image)| image.clone())
            .ok_or_else(|| anyhow!("no image registered for {path:?}"))
    }

    fn load_rom(&mut self, host_path: &str) -> Result<RomImage> {
        self.rom
            .clone()
            .ok_or_else(|| anyhow!("no ROM registered (asked for {host_path:?})"))
    }
}
