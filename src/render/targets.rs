//! Window-sized offscreen targets.
//!
//! The whole set (scene color, scene depth, scene pass, ping-pong pair) is
//! owned as one value and replaced as a unit on resize: the old set is
//! released before the new one is allocated.

use crate::gfx::{Allocation, GfxError, GraphicsDevice, ImageDesc, ImageId, ImageInfo, PassDesc, PassId, PixelFormat};

/// Sample count of the scene color and depth targets.
pub const OFFSCREEN_SAMPLE_COUNT: u32 = 4;

// ============================================================================
// Ping-pong pair
// ============================================================================

/// One of the two ping-pong targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Zero,
    One,
}

impl Side {
    /// Destination for a blur step: horizontal steps write side one.
    pub fn for_direction(horizontal: bool) -> Side {
        if horizontal {
            Side::One
        } else {
            Side::Zero
        }
    }

    pub fn other(self) -> Side {
        match self {
            Side::Zero => Side::One,
            Side::One => Side::Zero,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::Zero => 0,
            Side::One => 1,
        }
    }
}

/// A ping-pong target and the pass rendering into it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PingPongHalf {
    pub side: Side,
    pub image: ImageId,
    pub pass: PassId,
}

/// Two equally sized color targets, each with its own pass.
#[derive(Clone, Debug, PartialEq)]
pub struct PingPongPair {
    images: [ImageId; 2],
    passes: [PassId; 2],
}

impl PingPongPair {
    pub fn image(&self, side: Side) -> ImageId {
        self.images[side.index()]
    }

    pub fn pass(&self, side: Side) -> PassId {
        self.passes[side.index()]
    }

    fn half(&self, side: Side) -> PingPongHalf {
        PingPongHalf {
            side,
            image: self.image(side),
            pass: self.pass(side),
        }
    }

    /// `(read, write)` halves for a step writing `write`. The two halves are
    /// always different targets.
    pub fn split(&self, write: Side) -> (PingPongHalf, PingPongHalf) {
        (self.half(write.other()), self.half(write))
    }

    fn release(&self, device: &mut dyn GraphicsDevice) {
        for pass in self.passes {
            device.destroy_pass(pass);
        }
        for image in self.images {
            device.destroy_image(image);
        }
    }
}

// ============================================================================
// Offscreen target set
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct OffscreenTargets {
    pub width: u32,
    pub height: u32,
    pub color: ImageId,
    pub depth: ImageId,
    pub pass: PassId,
    pub pingpong: PingPongPair,
}

impl OffscreenTargets {
    fn release(&self, device: &mut dyn GraphicsDevice) {
        device.destroy_pass(self.pass);
        device.destroy_image(self.color);
        device.destroy_image(self.depth);
        self.pingpong.release(device);
    }
}

fn image(alloc: &mut Allocation<'_>, info: ImageInfo) -> Result<ImageId, GfxError> {
    alloc.image(&ImageDesc { info, data: None })
}

fn build_targets(
    alloc: &mut Allocation<'_>,
    width: u32,
    height: u32,
    sample_count: u32,
) -> Result<OffscreenTargets, GfxError> {
    let color = image(
        alloc,
        ImageInfo::render_target("color-image", width, height, PixelFormat::Rgba8).with_sample_count(sample_count),
    )?;
    let depth = image(
        alloc,
        ImageInfo::render_target("depth-image", width, height, PixelFormat::Depth).with_sample_count(sample_count),
    )?;
    let pass = alloc.pass(&PassDesc {
        label: "offscreen-pass",
        color_attachments: vec![color],
        depth_attachment: Some(depth),
    })?;

    let images = [
        image(alloc, ImageInfo::render_target("pingpong-image-0", width, height, PixelFormat::Rgba8))?,
        image(alloc, ImageInfo::render_target("pingpong-image-1", width, height, PixelFormat::Rgba8))?,
    ];
    let passes = [
        alloc.pass(&PassDesc {
            label: "pingpong-pass-0",
            color_attachments: vec![images[0]],
            depth_attachment: None,
        })?,
        alloc.pass(&PassDesc {
            label: "pingpong-pass-1",
            color_attachments: vec![images[1]],
            depth_attachment: None,
        })?,
    ];

    Ok(OffscreenTargets {
        width,
        height,
        color,
        depth,
        pass,
        pingpong: PingPongPair { images, passes },
    })
}

// ============================================================================
// Resource manager
// ============================================================================

/// Owner of the window-sized targets.
pub struct ResourceManager {
    sample_count: u32,
    targets: Option<OffscreenTargets>,
}

impl ResourceManager {
    pub fn new(sample_count: u32) -> Self {
        Self {
            sample_count,
            targets: None,
        }
    }

    pub fn targets(&self) -> Option<&OffscreenTargets> {
        self.targets.as_ref()
    }

    /// Replace the current targets with a fresh set of `width` x `height`.
    ///
    /// Zero dimensions are clamped to 1. On failure everything created by
    /// this call is released and the manager holds no targets.
    pub fn rebuild_offscreen_targets(
        &mut self,
        device: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
    ) -> Result<&OffscreenTargets, GfxError> {
        self.release(device);

        let width = width.max(1);
        let height = height.max(1);
        let targets = Allocation::scoped(device, |alloc| build_targets(alloc, width, height, self.sample_count))?;
        log::debug!("Offscreen targets rebuilt at {}x{}", width, height);
        Ok(&*self.targets.insert(targets))
    }

    /// Destroy the current targets, if any.
    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(old) = self.targets.take() {
            old.release(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::recording::RecordingBackend;

    #[test]
    fn test_split_sides_are_distinct() {
        let mut device = RecordingBackend::new();
        let mut manager = ResourceManager::new(OFFSCREEN_SAMPLE_COUNT);
        let targets = manager.rebuild_offscreen_targets(&mut device, 64, 32).unwrap();

        for write in [Side::Zero, Side::One] {
            let (read, dest) = targets.pingpong.split(write);
            assert_eq!(dest.side, write);
            assert_ne!(read.side, dest.side);
            assert_ne!(read.image, dest.image);
            assert_ne!(read.pass, dest.pass);
        }
    }

    #[test]
    fn test_target_formats() {
        let mut device = RecordingBackend::new();
        let mut manager = ResourceManager::new(OFFSCREEN_SAMPLE_COUNT);
        let targets = manager.rebuild_offscreen_targets(&mut device, 800, 600).unwrap().clone();

        let color = device.image_info(targets.color).unwrap();
        assert_eq!(color.pixel_format, PixelFormat::Rgba8);
        assert_eq!(color.sample_count, 4);
        assert_eq!((color.width, color.height), (800, 600));

        let depth = device.image_info(targets.depth).unwrap();
        assert!(depth.pixel_format.is_depth());
        assert_eq!(depth.sample_count, 4);

        for side in [Side::Zero, Side::One] {
            let info = device.image_info(targets.pingpong.image(side)).unwrap();
            assert_eq!(info.sample_count, 1);
            assert_eq!(info.filter, crate::gfx::Filter::Linear);
            assert_eq!(info.wrap, crate::gfx::Wrap::ClampToEdge);
        }
    }

    #[test]
    fn test_rebuild_replaces_old_set() {
        let mut device = RecordingBackend::new();
        let mut manager = ResourceManager::new(OFFSCREEN_SAMPLE_COUNT);
        let first = manager.rebuild_offscreen_targets(&mut device, 100, 100).unwrap().clone();
        manager.rebuild_offscreen_targets(&mut device, 200, 50).unwrap();

        assert!(device.image_info(first.color).is_none());
        assert!(device.pass_desc(first.pass).is_none());
        assert_eq!(device.live_images(), 4);
        assert_eq!(device.live_passes(), 3);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let mut device = RecordingBackend::new();
        let mut manager = ResourceManager::new(OFFSCREEN_SAMPLE_COUNT);
        let targets = manager.rebuild_offscreen_targets(&mut device, 0, 0).unwrap();
        assert_eq!((targets.width, targets.height), (1, 1));
    }

    #[test]
    fn test_failed_rebuild_releases_partial_set() {
        let mut device = RecordingBackend::new();
        let mut manager = ResourceManager::new(OFFSCREEN_SAMPLE_COUNT);
        manager.rebuild_offscreen_targets(&mut device, 64, 64).unwrap();

        // Color, depth and the scene pass succeed, the first ping-pong image fails
        device.fail_allocations_after(3);
        assert!(manager.rebuild_offscreen_targets(&mut device, 128, 128).is_err());
        assert!(manager.targets().is_none());
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_passes(), 0);

        device.clear_allocation_failures();
        manager.rebuild_offscreen_targets(&mut device, 128, 128).unwrap();
        assert_eq!(device.live_images(), 4);
    }
}
