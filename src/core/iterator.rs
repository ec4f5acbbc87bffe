//! Strided iteration over a region of an image buffer.
//!
//! [`RegionWalker`] does the offset arithmetic: it keeps a linear offset into
//! the buffer and one counter per axis. Moving to the next cell adds one;
//! finishing an axis adds a precomputed gap that skips the buffered cells
//! lying outside the iteration region. No multiplication happens per cell.
//!
//! [`RegionConstIterator`] and [`RegionIterator`] wrap a walker around a
//! shared or exclusive borrow of the buffer.

use crate::core::error::{RegionError, RegionResult};
use crate::core::image::{offset_of, Image, Pixel};
use crate::core::region::Region;

/// Offset engine shared by the region iterators.
#[derive(Debug, Clone)]
pub struct RegionWalker {
    region: Region,
    begin_offset: usize,
    end_offset: usize,
    offset: usize,
    position: Vec<usize>,
    /// `gaps[d]` is added when axis `d - 1` wraps and axis `d` advances.
    gaps: Vec<usize>,
}

impl RegionWalker {
    /// Prepare a walk over `region` in a buffer laid out for `buffered`.
    ///
    /// Fails with [`RegionError::OutOfBounds`] unless `region ⊆ buffered`.
    pub fn new(buffered: &Region, offset_table: &[usize], region: &Region) -> RegionResult<Self> {
        if region.dimension() != buffered.dimension() {
            return Err(RegionError::DimensionMismatch {
                expected: buffered.dimension(),
                got: region.dimension(),
            });
        }
        if !region.is_inside(buffered) {
            return Err(RegionError::OutOfBounds {
                region: region.clone(),
                bounds: buffered.clone(),
            });
        }

        let dim = region.dimension();
        let mut gaps = vec![0; dim];
        for d in 1..dim {
            gaps[d] = offset_table[d] - region.size_at(d - 1) * offset_table[d - 1];
        }

        let (begin_offset, end_offset) = if region.is_empty() {
            (0, 0)
        } else {
            let begin = offset_of(buffered, offset_table, region.index());
            let last: usize = (0..dim)
                .map(|d| (region.size_at(d) - 1) * offset_table[d])
                .sum();
            (begin, begin + last + 1)
        };

        Ok(Self {
            region: region.clone(),
            begin_offset,
            end_offset,
            offset: begin_offset,
            position: vec![0; dim],
            gaps,
        })
    }

    /// The region being walked.
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Current linear offset into the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the walk is past the last cell.
    pub fn is_at_end(&self) -> bool {
        self.offset == self.end_offset
    }

    /// Move to the first cell.
    pub fn go_to_begin(&mut self) {
        self.offset = self.begin_offset;
        self.position.iter_mut().for_each(|p| *p = 0);
    }

    /// Move one past the last cell.
    pub fn go_to_end(&mut self) {
        self.offset = self.end_offset;
        self.position.iter_mut().for_each(|p| *p = 0);
    }

    /// Move to the next cell in row-major order. Does nothing at the end.
    #[inline]
    pub fn advance(&mut self) {
        if self.offset == self.end_offset {
            return;
        }
        self.offset += 1;
        self.position[0] += 1;
        if self.position[0] < self.region.size_at(0) {
            return;
        }
        self.position[0] = 0;
        for d in 1..self.position.len() {
            self.offset += self.gaps[d];
            self.position[d] += 1;
            if self.position[d] < self.region.size_at(d) {
                return;
            }
            self.position[d] = 0;
        }
        self.offset = self.end_offset;
    }

    /// Lattice index of the current cell. Meaningless at the end.
    pub fn index(&self) -> Vec<i64> {
        self.region
            .index()
            .iter()
            .zip(&self.position)
            .map(|(&start, &p)| start + p as i64)
            .collect()
    }
}

impl Iterator for RegionWalker {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.is_at_end() {
            return None;
        }
        let offset = self.offset;
        self.advance();
        Some(offset)
    }
}

/// Read-only iterator over a region of an image.
#[derive(Debug, Clone)]
pub struct RegionConstIterator<'a, T: Pixel> {
    buffer: &'a [T],
    walker: RegionWalker,
}

impl<'a, T: Pixel> RegionConstIterator<'a, T> {
    /// Iterate `region`, which must lie inside the image's buffered region.
    pub fn new(image: &'a Image<T>, region: &Region) -> RegionResult<Self> {
        let buffer = image.buffer()?;
        let walker = RegionWalker::new(image.buffered_region(), image.offset_table(), region)?;
        Ok(Self { buffer, walker })
    }

    /// The region being iterated.
    pub fn region(&self) -> &Region {
        self.walker.region()
    }

    /// Whether the iterator is past the last cell.
    pub fn is_at_end(&self) -> bool {
        self.walker.is_at_end()
    }

    /// Move to the next cell.
    #[inline]
    pub fn advance(&mut self) {
        self.walker.advance();
    }

    /// Move to the first cell.
    pub fn go_to_begin(&mut self) {
        self.walker.go_to_begin();
    }

    /// Move one past the last cell.
    pub fn go_to_end(&mut self) {
        self.walker.go_to_end();
    }

    /// Value of the current cell.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is at its end.
    #[inline]
    pub fn get(&self) -> T {
        debug_assert!(!self.is_at_end(), "dereferenced an iterator at its end");
        self.buffer[self.walker.offset()]
    }

    /// Lattice index of the current cell.
    pub fn index(&self) -> Vec<i64> {
        self.walker.index()
    }

    /// Current linear offset into the buffer.
    pub fn offset(&self) -> usize {
        self.walker.offset()
    }
}

impl<T: Pixel> PartialEq for RegionConstIterator<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.walker.offset() == other.walker.offset()
    }
}

impl<T: Pixel> Iterator for RegionConstIterator<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.walker.next().map(|offset| self.buffer[offset])
    }
}

/// Read-write iterator over a region of an image.
#[derive(Debug)]
pub struct RegionIterator<'a, T: Pixel> {
    buffer: &'a mut [T],
    walker: RegionWalker,
}

impl<'a, T: Pixel> RegionIterator<'a, T> {
    /// Iterate `region`, which must lie inside the image's buffered region.
    pub fn new(image: &'a mut Image<T>, region: &Region) -> RegionResult<Self> {
        // A released image reports a stale buffer rather than an empty one.
        image.buffer()?;
        let walker = RegionWalker::new(image.buffered_region(), image.offset_table(), region)?;
        let buffer = image.buffer_mut()?;
        Ok(Self { buffer, walker })
    }

    /// The region being iterated.
    pub fn region(&self) -> &Region {
        self.walker.region()
    }

    /// Whether the iterator is past the last cell.
    pub fn is_at_end(&self) -> bool {
        self.walker.is_at_end()
    }

    /// Move to the next cell.
    #[inline]
    pub fn advance(&mut self) {
        self.walker.advance();
    }

    /// Move to the first cell.
    pub fn go_to_begin(&mut self) {
        self.walker.go_to_begin();
    }

    /// Move one past the last cell.
    pub fn go_to_end(&mut self) {
        self.walker.go_to_end();
    }

    /// Value of the current cell.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is at its end.
    #[inline]
    pub fn get(&self) -> T {
        debug_assert!(!self.is_at_end(), "dereferenced an iterator at its end");
        self.buffer[self.walker.offset()]
    }

    /// Overwrite the current cell.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is at its end.
    #[inline]
    pub fn set(&mut self, value: T) {
        debug_assert!(!self.is_at_end(), "dereferenced an iterator at its end");
        self.buffer[self.walker.offset()] = value;
    }

    /// Mutable reference to the current cell.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is at its end.
    pub fn value_mut(&mut self) -> &mut T {
        debug_assert!(!self.is_at_end(), "dereferenced an iterator at its end");
        &mut self.buffer[self.walker.offset()]
    }

    /// Lattice index of the current cell.
    pub fn index(&self) -> Vec<i64> {
        self.walker.index()
    }

    /// Current linear offset into the buffer.
    pub fn offset(&self) -> usize {
        self.walker.offset()
    }
}

impl<T: Pixel> PartialEq for RegionIterator<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.walker.offset() == other.walker.offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::ImageInformation;
    use proptest::prelude::*;

    /// A buffer whose pixel value equals its linear offset.
    fn ramp(size: &[usize], start: &[i64]) -> Image<u32> {
        let region = Region::new(start.to_vec(), size.to_vec());
        let data = (0..region.number_of_cells() as u32).collect();
        Image::from_vec(ImageInformation::new(region.clone()), region, data).unwrap()
    }

    #[test]
    fn test_walks_sub_region_in_row_major_order() {
        let image = ramp(&[4, 3], &[0, 0]);
        let region = Region::new([1, 1], [2, 2]);
        let values: Vec<u32> = RegionConstIterator::new(&image, &region).unwrap().collect();
        assert_eq!(values, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_index_tracking() {
        let image = ramp(&[4, 4, 2], &[-1, 0, 5]);
        let region = Region::new([0, 1, 5], [2, 2, 2]);
        let mut it = RegionConstIterator::new(&image, &region).unwrap();
        let mut indices = Vec::new();
        while !it.is_at_end() {
            indices.push(it.index());
            it.advance();
        }
        assert_eq!(indices.len(), 8);
        assert_eq!(indices[0], vec![0, 1, 5]);
        assert_eq!(indices[1], vec![1, 1, 5]);
        assert_eq!(indices[2], vec![0, 2, 5]);
        assert_eq!(indices[4], vec![0, 1, 6]);
        assert_eq!(indices[7], vec![1, 2, 6]);
    }

    #[test]
    fn test_region_outside_buffer_is_rejected() {
        let image = ramp(&[4, 4], &[0, 0]);
        let region = Region::new([3, 3], [2, 1]);
        assert!(matches!(
            RegionConstIterator::new(&image, &region),
            Err(RegionError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_released_buffer_is_stale() {
        let mut image = ramp(&[2, 2], &[0, 0]);
        image.release_data();
        assert!(matches!(
            RegionConstIterator::new(&image, &Region::from_size([1, 1])),
            Err(RegionError::StaleBufferAccess { .. })
        ));
    }

    #[test]
    fn test_released_buffer_is_stale_for_writers() {
        let mut image = ramp(&[4, 4], &[0, 0]);
        image.release_data();
        assert!(matches!(
            RegionIterator::new(&mut image, &Region::from_size([2, 2])),
            Err(RegionError::StaleBufferAccess { .. })
        ));
    }

    #[test]
    #[should_panic]
    fn test_value_mut_at_end_panics() {
        let mut image = ramp(&[3, 2], &[0, 0]);
        let region = image.buffered_region().clone();
        let mut it = RegionIterator::new(&mut image, &region).unwrap();
        it.go_to_end();
        *it.value_mut() = 0;
    }

    #[test]
    fn test_empty_region_starts_at_end() {
        let image = ramp(&[4, 4], &[0, 0]);
        let it = RegionConstIterator::new(&image, &Region::new([1, 1], [0, 3])).unwrap();
        assert!(it.is_at_end());
    }

    #[test]
    fn test_begin_end_and_equality() {
        let image = ramp(&[3, 3], &[0, 0]);
        let region = Region::new([1, 0], [2, 3]);
        let mut a = RegionConstIterator::new(&image, &region).unwrap();
        let mut b = a.clone();
        assert!(a == b);
        a.advance();
        assert!(a != b);
        b.go_to_end();
        while !a.is_at_end() {
            a.advance();
        }
        assert!(a == b);
        a.go_to_begin();
        assert_eq!(a.get(), 1);
    }

    #[test]
    fn test_read_write_iterator() {
        let mut image = ramp(&[3, 3], &[0, 0]);
        let region = Region::new([0, 1], [3, 1]);
        let mut it = RegionIterator::new(&mut image, &region).unwrap();
        while !it.is_at_end() {
            let v = it.get();
            it.set(v + 100);
            it.advance();
        }
        assert_eq!(image.buffer().unwrap(), &[0, 1, 2, 103, 104, 105, 6, 7, 8]);
    }

    proptest! {
        #[test]
        fn visits_every_cell_once_in_increasing_order(
            size in proptest::collection::vec(1usize..6, 1..5),
            seed in proptest::collection::vec((0usize..6, 0usize..6), 5),
        ) {
            let dim = size.len();
            let start: Vec<i64> = (0..dim).map(|d| d as i64 - 1).collect();
            let image = ramp(&size, &start);

            // Sub-region built from the seed, clamped to the buffer.
            let mut index = Vec::with_capacity(dim);
            let mut extent = Vec::with_capacity(dim);
            for d in 0..dim {
                let (a, b) = seed[d];
                let lo = a % size[d];
                let len = b % (size[d] - lo + 1);
                index.push(start[d] + lo as i64);
                extent.push(len);
            }
            let region = Region::new(index, extent);

            let mut it = RegionConstIterator::new(&image, &region).unwrap();
            let mut seen = Vec::new();
            while !it.is_at_end() {
                let idx = it.index();
                prop_assert!(region.is_inside_index(&idx));
                prop_assert_eq!(Some(it.offset()), image.compute_offset(&idx));
                seen.push(it.get());
                it.advance();
            }
            prop_assert_eq!(seen.len(), region.number_of_cells());
            prop_assert!(seen.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
