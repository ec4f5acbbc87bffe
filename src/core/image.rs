//! N-dimensional images and the pixel trait.
//!
//! An [`Image`] owns one contiguous buffer covering its *buffered region* and
//! tracks two more regions used by the pipeline:
//!
//! - the *largest possible region*, set by the producing node during
//!   information negotiation, and
//! - the *requested region*, set by whichever consumer asked for data.
//!
//! Geometry (origin, spacing, direction) is carried in [`ImageInformation`]
//! and propagated by nodes, but the pipeline itself never interprets it.

use crate::core::error::{NodeId, RegionError, RegionResult};
use crate::core::region::Region;
use bytemuck::Pod;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type stored in an image buffer.
///
/// Pixels are plain-old-data so buffers can be handed to raw sinks as bytes.
pub trait Pixel: Pod + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Widen to `f64` for arithmetic.
    fn to_f64(self) -> f64;

    /// Narrow from `f64`. Integer pixels round and saturate.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_integer_pixel {
    ($($t:ty),*) => {
        $(
            impl Pixel for $t {
                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(value: f64) -> Self {
                    value.round() as $t
                }
            }
        )*
    };
}

macro_rules! impl_float_pixel {
    ($($t:ty),*) => {
        $(
            impl Pixel for $t {
                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(value: f64) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_integer_pixel!(u8, u16, i16, u32, i32);
impl_float_pixel!(f32, f64);

/// Everything known about an image before any pixel is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInformation {
    /// The full extent the image could hold.
    pub largest_possible_region: Region,
    /// Physical coordinates of index zero.
    pub origin: Vec<f64>,
    /// Physical distance between neighbouring cells, per axis.
    pub spacing: Vec<f64>,
    /// Direction cosines, row-major `D x D`.
    pub direction: Vec<f64>,
}

impl ImageInformation {
    /// Information with unit spacing, zero origin and identity direction.
    pub fn new(largest_possible_region: Region) -> Self {
        let dim = largest_possible_region.dimension();
        let mut direction = vec![0.0; dim * dim];
        for d in 0..dim {
            direction[d * dim + d] = 1.0;
        }
        Self {
            largest_possible_region,
            origin: vec![0.0; dim],
            spacing: vec![1.0; dim],
            direction,
        }
    }

    /// Set the origin.
    pub fn with_origin(mut self, origin: impl Into<Vec<f64>>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Set the spacing.
    pub fn with_spacing(mut self, spacing: impl Into<Vec<f64>>) -> Self {
        self.spacing = spacing.into();
        self
    }

    /// Number of axes.
    pub fn dimension(&self) -> usize {
        self.largest_possible_region.dimension()
    }

    /// Keep only the listed axes. The direction matrix keeps the matching
    /// rows and columns.
    pub fn project(&self, axes: &[usize]) -> Self {
        let dim = self.dimension();
        let mut direction = Vec::with_capacity(axes.len() * axes.len());
        for &row in axes {
            for &col in axes {
                direction.push(self.direction[row * dim + col]);
            }
        }
        Self {
            largest_possible_region: self.largest_possible_region.project(axes),
            origin: axes.iter().map(|&a| self.origin[a]).collect(),
            spacing: axes.iter().map(|&a| self.spacing[a]).collect(),
            direction,
        }
    }

    /// Add one axis with the given extent and geometry. The new axis is
    /// orthogonal to the existing ones.
    pub fn appended(&self, index: i64, size: usize, origin: f64, spacing: f64) -> Self {
        let dim = self.dimension();
        let new_dim = dim + 1;
        let mut direction = vec![0.0; new_dim * new_dim];
        for row in 0..dim {
            for col in 0..dim {
                direction[row * new_dim + col] = self.direction[row * dim + col];
            }
        }
        direction[dim * new_dim + dim] = 1.0;

        let mut info = self.clone();
        info.largest_possible_region = self.largest_possible_region.appended(index, size);
        info.origin.push(origin);
        info.spacing.push(spacing);
        info.direction = direction;
        info
    }

    /// Physical coordinates of a lattice index.
    pub fn index_to_physical(&self, index: &[i64]) -> Vec<f64> {
        let dim = self.dimension();
        (0..dim)
            .map(|row| {
                self.origin[row]
                    + (0..dim)
                        .map(|col| {
                            self.direction[row * dim + col] * self.spacing[col] * index[col] as f64
                        })
                        .sum::<f64>()
            })
            .collect()
    }
}

/// Which downstream nodes read an image, and which of them still have to
/// read it in the current update cycle.
///
/// Consumers are registered when they are connected. At the start of an
/// update the orchestrator arms the table with the consumers taking part in
/// that update; a buffer flagged for early release can be freed once all of
/// them are done with it.
#[derive(Debug, Clone, Default)]
pub struct ConsumerTable {
    last_read: IndexMap<NodeId, Option<u64>>,
    pending: Option<(u64, IndexSet<NodeId>)>,
}

impl ConsumerTable {
    /// Register a consumer.
    pub fn register(&mut self, consumer: NodeId) {
        self.last_read.entry(consumer).or_insert(None);
    }

    /// Remove a consumer.
    pub fn unregister(&mut self, consumer: NodeId) {
        self.last_read.shift_remove(&consumer);
        if let Some((_, pending)) = &mut self.pending {
            pending.shift_remove(&consumer);
        }
    }

    /// Number of registered consumers.
    pub fn len(&self) -> usize {
        self.last_read.len()
    }

    /// Whether no consumer is registered.
    pub fn is_empty(&self) -> bool {
        self.last_read.is_empty()
    }

    /// The cycle in which `consumer` last read the image.
    pub fn last_read(&self, consumer: NodeId) -> Option<u64> {
        self.last_read.get(&consumer).copied().flatten()
    }

    /// Start `cycle` expecting the given consumers to read the image.
    ///
    /// Consumers that were never registered are ignored. With no expected
    /// reader the table stays disarmed and [`ConsumerTable::all_read_in`]
    /// reports `false` for the cycle.
    pub fn expect_readers(&mut self, cycle: u64, readers: impl IntoIterator<Item = NodeId>) {
        let readers: IndexSet<NodeId> = readers
            .into_iter()
            .filter(|reader| self.last_read.contains_key(reader))
            .collect();
        self.pending = (!readers.is_empty()).then_some((cycle, readers));
    }

    /// Record that `consumer` is done with the image during `cycle`.
    pub fn mark_read(&mut self, consumer: NodeId, cycle: u64) {
        if let Some(last) = self.last_read.get_mut(&consumer) {
            *last = Some(cycle);
        }
        if let Some((armed, pending)) = &mut self.pending {
            if *armed == cycle {
                pending.shift_remove(&consumer);
            }
        }
    }

    /// Whether every reader expected in `cycle` is done with the image.
    pub fn all_read_in(&self, cycle: u64) -> bool {
        matches!(&self.pending, Some((armed, pending)) if *armed == cycle && pending.is_empty())
    }
}

/// An N-dimensional pixel buffer with pipeline bookkeeping.
#[derive(Clone)]
pub struct Image<T: Pixel> {
    information: ImageInformation,
    buffered_region: Region,
    requested_region: Option<Region>,
    offset_table: Vec<usize>,
    buffer: Option<Vec<T>>,
    released: bool,
    consumers: ConsumerTable,
}

impl<T: Pixel> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("largest_possible_region", &self.information.largest_possible_region)
            .field("buffered_region", &self.buffered_region)
            .field("requested_region", &self.requested_region)
            .field("allocated", &self.buffer.is_some())
            .field("released", &self.released)
            .finish()
    }
}

impl<T: Pixel> Default for Image<T> {
    fn default() -> Self {
        Self::new(ImageInformation::new(Region::empty(1)))
    }
}

impl<T: Pixel> Image<T> {
    /// Create an image with information only; no buffer is allocated.
    pub fn new(information: ImageInformation) -> Self {
        let dim = information.dimension();
        Self {
            information,
            buffered_region: Region::empty(dim),
            requested_region: None,
            offset_table: vec![0; dim + 1],
            buffer: None,
            released: false,
            consumers: ConsumerTable::default(),
        }
    }

    /// Create an image whose whole largest region is buffered with `value`.
    pub fn filled(information: ImageInformation, value: T) -> Self {
        let region = information.largest_possible_region.clone();
        let mut image = Self::new(information);
        image.allocate(&region);
        if let Some(buffer) = image.buffer.as_mut() {
            buffer.fill(value);
        }
        image
    }

    /// Create an image from existing pixel data covering `region`.
    pub fn from_vec(information: ImageInformation, region: Region, data: Vec<T>) -> RegionResult<Self> {
        if region.dimension() != information.dimension() {
            return Err(RegionError::DimensionMismatch {
                expected: information.dimension(),
                got: region.dimension(),
            });
        }
        if data.len() != region.number_of_cells() {
            return Err(RegionError::BufferSizeMismatch {
                expected: region.number_of_cells(),
                got: data.len(),
            });
        }
        let mut image = Self::new(information);
        image.offset_table = compute_offset_table(region.size());
        image.buffered_region = region;
        image.buffer = Some(data);
        Ok(image)
    }

    // ========================================================================
    // Information
    // ========================================================================

    /// Geometry and largest region.
    pub fn information(&self) -> &ImageInformation {
        &self.information
    }

    /// Replace the information. Called by the producing node's information
    /// stage; leaves the buffer untouched.
    pub fn set_information(&mut self, information: ImageInformation) {
        if information.dimension() != self.information.dimension() {
            self.buffered_region = Region::empty(information.dimension());
            self.requested_region = None;
            self.buffer = None;
            self.offset_table = vec![0; information.dimension() + 1];
        }
        self.information = information;
    }

    /// Number of axes.
    pub fn dimension(&self) -> usize {
        self.information.dimension()
    }

    /// The full extent the image could hold.
    pub fn largest_possible_region(&self) -> &Region {
        &self.information.largest_possible_region
    }

    /// The region with allocated, valid pixels.
    pub fn buffered_region(&self) -> &Region {
        &self.buffered_region
    }

    /// The region a consumer asked for; the largest region when none was set.
    pub fn requested_region(&self) -> &Region {
        self.requested_region
            .as_ref()
            .unwrap_or(&self.information.largest_possible_region)
    }

    /// Whether a consumer explicitly set the requested region.
    pub fn has_requested_region(&self) -> bool {
        self.requested_region.is_some()
    }

    /// Set the requested region.
    pub fn set_requested_region(&mut self, region: Region) {
        self.requested_region = Some(region);
    }

    /// Forget the explicit requested region.
    pub fn clear_requested_region(&mut self) {
        self.requested_region = None;
    }

    /// Whether the requested region reaches outside the buffered region.
    pub fn requested_region_is_outside_buffered(&self) -> bool {
        self.buffer.is_none() || !self.requested_region().is_inside(&self.buffered_region)
    }

    /// Check `requested ⊆ largest`.
    pub fn verify_requested_region(&self) -> RegionResult<()> {
        if self.requested_region().is_inside(self.largest_possible_region()) {
            Ok(())
        } else {
            Err(RegionError::OutOfBounds {
                region: self.requested_region().clone(),
                bounds: self.largest_possible_region().clone(),
            })
        }
    }

    // ========================================================================
    // Buffer
    // ========================================================================

    /// Allocate (or reuse) the buffer so it covers exactly `region`.
    ///
    /// Pixel values are reset to `T::default()`.
    pub fn allocate(&mut self, region: &Region) {
        let cells = region.number_of_cells();
        let buffer = self.buffer.get_or_insert_with(Vec::new);
        buffer.clear();
        buffer.resize(cells, T::default());
        self.offset_table = compute_offset_table(region.size());
        self.buffered_region = region.clone();
        self.released = false;
    }

    /// Free the buffer. The buffered region becomes empty and any further
    /// access fails with [`RegionError::StaleBufferAccess`] until the image
    /// is allocated again.
    pub fn release_data(&mut self) {
        self.buffer = None;
        self.buffered_region = Region::empty(self.dimension());
        self.released = true;
    }

    /// Whether the buffer was freed by [`Image::release_data`].
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Whether a buffer is allocated.
    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Bytes held by the buffer.
    pub fn byte_size(&self) -> usize {
        self.buffer
            .as_ref()
            .map(|b| b.len() * std::mem::size_of::<T>())
            .unwrap_or(0)
    }

    /// Row-major strides of the buffer. Entry `d` is the linear distance
    /// between neighbours along axis `d`; the final entry is the total length.
    pub fn offset_table(&self) -> &[usize] {
        &self.offset_table
    }

    /// Read access to the whole buffer.
    pub fn buffer(&self) -> RegionResult<&[T]> {
        self.buffer.as_deref().ok_or_else(|| self.stale_error())
    }

    /// Write access to the whole buffer.
    pub fn buffer_mut(&mut self) -> RegionResult<&mut [T]> {
        if self.buffer.is_none() {
            return Err(self.stale_error());
        }
        Ok(self.buffer.as_deref_mut().unwrap_or_default())
    }

    /// Linear offset of `index` in the buffer, if it is buffered.
    pub fn compute_offset(&self, index: &[i64]) -> Option<usize> {
        if !self.buffered_region.is_inside_index(index) {
            return None;
        }
        Some(offset_of(&self.buffered_region, &self.offset_table, index))
    }

    /// Read one pixel.
    pub fn pixel(&self, index: &[i64]) -> RegionResult<T> {
        let buffer = self.buffer()?;
        let offset = self.compute_offset(index).ok_or_else(|| self.index_error(index))?;
        Ok(buffer[offset])
    }

    /// Write one pixel.
    pub fn set_pixel(&mut self, index: &[i64], value: T) -> RegionResult<()> {
        let offset = self.compute_offset(index).ok_or_else(|| self.index_error(index))?;
        self.buffer_mut()?[offset] = value;
        Ok(())
    }

    /// Copy the pixels of `region` out into a new vector, row-major.
    pub fn copy_region(&self, region: &Region) -> RegionResult<Vec<T>> {
        let mut it = crate::core::iterator::RegionConstIterator::new(self, region)?;
        let mut out = Vec::with_capacity(region.number_of_cells());
        while !it.is_at_end() {
            out.push(it.get());
            it.advance();
        }
        Ok(out)
    }

    /// Copy `source_region` of `source` into `dest` of this image.
    ///
    /// Both regions are walked in row-major order, so they only need the same
    /// number of cells. Axes of size one may be present in one region and
    /// absent in the other.
    pub fn paste_from(&mut self, dest: &Region, source: &Image<T>, source_region: &Region) -> RegionResult<()> {
        if dest.number_of_cells() != source_region.number_of_cells() {
            return Err(RegionError::BufferSizeMismatch {
                expected: dest.number_of_cells(),
                got: source_region.number_of_cells(),
            });
        }
        let mut from = crate::core::iterator::RegionConstIterator::new(source, source_region)?;
        let mut to = crate::core::iterator::RegionIterator::new(self, dest)?;
        while !to.is_at_end() {
            to.set(from.get());
            to.advance();
            from.advance();
        }
        Ok(())
    }

    // ========================================================================
    // Consumers
    // ========================================================================

    /// The consumer registration table.
    pub fn consumers(&self) -> &ConsumerTable {
        &self.consumers
    }

    /// Mutable access to the consumer registration table.
    pub fn consumers_mut(&mut self) -> &mut ConsumerTable {
        &mut self.consumers
    }

    fn stale_error(&self) -> RegionError {
        RegionError::StaleBufferAccess {
            region: self.requested_region().clone(),
        }
    }

    fn index_error(&self, index: &[i64]) -> RegionError {
        if self.buffer.is_none() {
            return self.stale_error();
        }
        RegionError::OutOfBounds {
            region: Region::new(index.to_vec(), vec![1; index.len()]),
            bounds: self.buffered_region.clone(),
        }
    }
}

/// Row-major strides for a buffer of the given size, plus the total length.
pub(crate) fn compute_offset_table(size: &[usize]) -> Vec<usize> {
    let mut table = Vec::with_capacity(size.len() + 1);
    table.push(1);
    for d in 0..size.len() {
        table.push(table[d] * size[d]);
    }
    table
}

/// Linear offset of `index` relative to the start of `buffered`.
pub(crate) fn offset_of(buffered: &Region, offset_table: &[usize], index: &[i64]) -> usize {
    index
        .iter()
        .zip(buffered.index())
        .zip(offset_table)
        .map(|((&i, &start), &stride)| (i - start) as usize * stride)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(size: &[usize]) -> ImageInformation {
        ImageInformation::new(Region::from_size(size.to_vec()))
    }

    #[test]
    fn test_offset_table() {
        assert_eq!(compute_offset_table(&[4, 3, 2]), vec![1, 4, 12, 24]);
    }

    #[test]
    fn test_new_image_is_unallocated() {
        let image: Image<u8> = Image::new(info(&[4, 4]));
        assert!(!image.is_allocated());
        assert!(image.buffered_region().is_empty());
        assert_eq!(image.requested_region(), image.largest_possible_region());
        assert!(image.requested_region_is_outside_buffered());
    }

    #[test]
    fn test_pixel_access_uses_buffered_region_index() {
        let mut image: Image<i32> = Image::new(info(&[8, 8]));
        image.allocate(&Region::new([2, 3], [3, 2]));
        image.set_pixel(&[4, 4], 7).unwrap();
        assert_eq!(image.pixel(&[4, 4]).unwrap(), 7);
        // (4 - 2) * 1 + (4 - 3) * 3
        assert_eq!(image.compute_offset(&[4, 4]), Some(5));
        assert!(matches!(
            image.pixel(&[0, 0]),
            Err(RegionError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_release_data() {
        let mut image = Image::filled(info(&[2, 2]), 3u8);
        assert_eq!(image.byte_size(), 4);
        image.release_data();
        assert!(image.is_released());
        assert_eq!(image.byte_size(), 0);
        assert!(matches!(
            image.pixel(&[0, 0]),
            Err(RegionError::StaleBufferAccess { .. })
        ));
        assert!(image.requested_region_is_outside_buffered());
    }

    #[test]
    fn test_from_vec_checks_length() {
        let region = Region::from_size([2, 2]);
        assert!(Image::from_vec(info(&[2, 2]), region.clone(), vec![0u8; 3]).is_err());
        let image = Image::from_vec(info(&[2, 2]), region, vec![1u8, 2, 3, 4]).unwrap();
        assert_eq!(image.pixel(&[1, 1]).unwrap(), 4);
    }

    #[test]
    fn test_consumer_table() {
        let mut table = ConsumerTable::default();
        assert!(!table.all_read_in(1));

        let a = NodeId::new();
        let b = NodeId::new();
        table.register(a);
        table.register(b);
        table.expect_readers(1, [a, b]);
        table.mark_read(a, 1);
        assert!(!table.all_read_in(1));
        table.mark_read(b, 1);
        assert!(table.all_read_in(1));
        assert!(!table.all_read_in(2));
        assert_eq!(table.last_read(a), Some(1));

        table.unregister(b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_consumer_table_only_waits_for_expected_readers() {
        let mut table = ConsumerTable::default();
        let reader = NodeId::new();
        let idle = NodeId::new();
        table.register(reader);
        table.register(idle);

        // `idle` is connected but takes no part in cycle 3.
        table.expect_readers(3, [reader, NodeId::new()]);
        table.mark_read(reader, 3);
        assert!(table.all_read_in(3));
        assert_eq!(table.last_read(idle), None);

        // A read from an earlier cycle does not count.
        table.expect_readers(4, [reader]);
        table.mark_read(reader, 3);
        assert!(!table.all_read_in(4));

        table.expect_readers(5, [NodeId::new()]);
        assert!(!table.all_read_in(5));
    }

    #[test]
    fn test_information_project_and_append() {
        let base = info(&[4, 5, 6]).with_spacing([1.0, 2.0, 3.0]);
        let slice = base.project(&[0, 1]);
        assert_eq!(slice.spacing, vec![1.0, 2.0]);
        assert_eq!(slice.direction, vec![1.0, 0.0, 0.0, 1.0]);

        let stacked = slice.appended(0, 6, 10.0, 0.5);
        assert_eq!(stacked.largest_possible_region, Region::from_size([4, 5, 6]));
        assert_eq!(stacked.origin, vec![0.0, 0.0, 10.0]);
        assert_eq!(stacked.index_to_physical(&[1, 1, 2]), vec![1.0, 2.0, 11.0]);
    }

    #[test]
    fn test_paste_collapses_unit_axes() {
        let volume_info = info(&[2, 2, 3]);
        let data: Vec<u16> = (0..12).collect();
        let volume = Image::from_vec(volume_info.clone(), volume_info.largest_possible_region.clone(), data).unwrap();

        let mut slice: Image<u16> = Image::new(info(&[2, 2]));
        slice.allocate(&Region::from_size([2, 2]));
        slice
            .paste_from(&Region::from_size([2, 2]), &volume, &Region::new([0, 0, 1], [2, 2, 1]))
            .unwrap();
        assert_eq!(slice.buffer().unwrap(), &[4, 5, 6, 7]);

        assert!(matches!(
            slice.paste_from(&Region::from_size([2, 2]), &volume, &Region::from_size([2, 2, 2])),
            Err(RegionError::BufferSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_integer_pixels_saturate() {
        assert_eq!(u8::from_f64(300.0), 255);
        assert_eq!(u8::from_f64(-4.0), 0);
        assert_eq!(i16::from_f64(2.6), 3);
        assert_eq!(f32::from_f64(0.5), 0.5);
    }
}
