//! Axis-aligned N-dimensional regions.
//!
//! A [`Region`] is a box on the integer lattice, described by the index of its
//! first cell and its extent along each axis. Regions are plain values: they
//! are cloned freely and never shared mutably.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An axis-aligned box within an N-dimensional lattice.
///
/// A region with any zero-sized axis is empty and contains no cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    index: Vec<i64>,
    size: Vec<usize>,
}

impl Region {
    /// Create a region from a start index and a size.
    ///
    /// # Panics
    ///
    /// Panics if `index` and `size` have different lengths or are empty.
    pub fn new(index: impl Into<Vec<i64>>, size: impl Into<Vec<usize>>) -> Self {
        let index = index.into();
        let size = size.into();
        assert_eq!(
            index.len(),
            size.len(),
            "region index and size must have the same dimension"
        );
        assert!(!index.is_empty(), "regions must have at least one dimension");
        Self { index, size }
    }

    /// Create a region starting at the origin.
    pub fn from_size(size: impl Into<Vec<usize>>) -> Self {
        let size = size.into();
        let index = vec![0; size.len()];
        Self::new(index, size)
    }

    /// Number of axes.
    pub fn dimension(&self) -> usize {
        self.size.len()
    }

    /// Index of the first cell.
    pub fn index(&self) -> &[i64] {
        &self.index
    }

    /// Extent along each axis.
    pub fn size(&self) -> &[usize] {
        &self.size
    }

    /// Start index along one axis.
    pub fn index_at(&self, axis: usize) -> i64 {
        self.index[axis]
    }

    /// Extent along one axis.
    pub fn size_at(&self, axis: usize) -> usize {
        self.size[axis]
    }

    /// One past the last index along `axis`.
    pub fn end_at(&self, axis: usize) -> i64 {
        self.index[axis] + self.size[axis] as i64
    }

    /// Total number of cells.
    pub fn number_of_cells(&self) -> usize {
        self.size.iter().product()
    }

    /// Whether the region contains no cells.
    pub fn is_empty(&self) -> bool {
        self.size.iter().any(|&s| s == 0)
    }

    /// The empty region of the given dimension.
    pub fn empty(dimension: usize) -> Self {
        Self::new(vec![0; dimension], vec![0; dimension])
    }

    /// Whether `index` lies inside this region.
    pub fn is_inside_index(&self, index: &[i64]) -> bool {
        index.len() == self.dimension()
            && (0..self.dimension()).all(|d| index[d] >= self.index[d] && index[d] < self.end_at(d))
    }

    /// Whether this region is entirely contained in `other`.
    ///
    /// An empty region is inside any region of the same dimension. Regions of
    /// different dimension never contain one another.
    pub fn is_inside(&self, other: &Region) -> bool {
        if self.dimension() != other.dimension() {
            return false;
        }
        if self.is_empty() {
            return true;
        }
        (0..self.dimension()).all(|d| {
            self.index[d] >= other.index[d] && self.end_at(d) <= other.end_at(d)
        })
    }

    /// The cells common to both regions; empty when they do not overlap.
    pub fn intersection(&self, other: &Region) -> Region {
        assert_eq!(self.dimension(), other.dimension());
        let mut index = Vec::with_capacity(self.dimension());
        let mut size = Vec::with_capacity(self.dimension());
        for d in 0..self.dimension() {
            let start = self.index[d].max(other.index[d]);
            let end = self.end_at(d).min(other.end_at(d));
            index.push(start);
            size.push((end - start).max(0) as usize);
        }
        Region { index, size }
    }

    /// The smallest region containing both. Empty operands are ignored.
    pub fn bounding_union(&self, other: &Region) -> Region {
        assert_eq!(self.dimension(), other.dimension());
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        let mut index = Vec::with_capacity(self.dimension());
        let mut size = Vec::with_capacity(self.dimension());
        for d in 0..self.dimension() {
            let start = self.index[d].min(other.index[d]);
            let end = self.end_at(d).max(other.end_at(d));
            index.push(start);
            size.push((end - start) as usize);
        }
        Region { index, size }
    }

    /// Whether the two regions share at least one cell.
    pub fn overlaps(&self, other: &Region) -> bool {
        self.dimension() == other.dimension() && !self.intersection(other).is_empty()
    }

    /// Grow the region by `radius[d]` cells on both sides of each axis.
    pub fn padded(&self, radius: &[usize]) -> Region {
        assert_eq!(radius.len(), self.dimension());
        let index = self
            .index
            .iter()
            .zip(radius)
            .map(|(&i, &r)| i - r as i64)
            .collect();
        let size = self.size.iter().zip(radius).map(|(&s, &r)| s + 2 * r).collect();
        Region { index, size }
    }

    /// Clip the region to `bounds`.
    pub fn cropped_to(&self, bounds: &Region) -> Region {
        self.intersection(bounds)
    }

    /// A copy with the start index along `axis` replaced.
    pub fn with_index_at(&self, axis: usize, index: i64) -> Region {
        let mut region = self.clone();
        region.index[axis] = index;
        region
    }

    /// A copy with the extent along `axis` replaced.
    pub fn with_size_at(&self, axis: usize, size: usize) -> Region {
        let mut region = self.clone();
        region.size[axis] = size;
        region
    }

    /// Keep only the listed axes, in the listed order.
    pub fn project(&self, axes: &[usize]) -> Region {
        Region::new(
            axes.iter().map(|&a| self.index[a]).collect::<Vec<_>>(),
            axes.iter().map(|&a| self.size[a]).collect::<Vec<_>>(),
        )
    }

    /// Append one more axis after the existing ones.
    pub fn appended(&self, index: i64, size: usize) -> Region {
        let mut region = self.clone();
        region.index.push(index);
        region.size.push(size);
        region
    }

    /// The axis with the largest extent; the slowest-varying axis wins ties.
    pub fn largest_axis(&self) -> usize {
        let mut best = 0;
        for d in 1..self.dimension() {
            if self.size[d] >= self.size[best] {
                best = d;
            }
        }
        best
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |v: Vec<String>| v.join(", ");
        write!(
            f,
            "[index=({}), size=({})]",
            join(self.index.iter().map(|i| i.to_string()).collect()),
            join(self.size.iter().map(|s| s.to_string()).collect())
        )
    }
}
