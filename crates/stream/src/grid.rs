use glam::Vec3;
use std::collections::HashMap;
use std::fmt;

use crate::chunk::Chunk;

/// A 3D cell coordinate in the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Which chunk an entity lives in: a grid cell, or the fallback chunk that
/// holds everything outside the grid's bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChunkSlot {
    Cell(CellCoord),
    World,
}

impl fmt::Display for ChunkSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cell(c) => write!(f, "cell({}, {}, {})", c.x, c.y, c.z),
            Self::World => f.write_str("world"),
        }
    }
}

/// Sparse fixed-size grid of chunks over a cube centered at the origin.
///
/// Chunks are allocated on demand by [`SpatialGrid::require`] and erased by the
/// owner once empty; the grid itself never checks emptiness.
#[derive(Debug)]
pub struct SpatialGrid {
    cell_size: f32,
    half_extent: f32,
    cells: HashMap<CellCoord, Chunk>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32, half_extent: f32) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive");
        assert!(half_extent > 0.0, "half_extent must be positive");
        Self {
            cell_size,
            half_extent,
            cells: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn half_extent(&self) -> f32 {
        self.half_extent
    }

    /// Convert a world position to a cell coordinate.
    pub fn cell_of(&self, location: Vec3) -> CellCoord {
        CellCoord {
            x: self.axis_cell(location.x),
            y: self.axis_cell(location.y),
            z: self.axis_cell(location.z),
        }
    }

    fn axis_cell(&self, value: f32) -> i32 {
        (value / self.cell_size).floor() as i32
    }

    /// True iff `location` lies within the gridded cube.
    pub fn contains_point(&self, location: Vec3) -> bool {
        location.abs().max_element() <= self.half_extent
    }

    /// Chunk for `location`'s cell, created if absent.
    pub fn require(&mut self, location: Vec3) -> &mut Chunk {
        let coord = self.cell_of(location);
        self.require_cell(coord)
    }

    pub fn require_cell(&mut self, coord: CellCoord) -> &mut Chunk {
        self.cells.entry(coord).or_insert_with(|| {
            tracing::debug!(?coord, "allocating chunk");
            Chunk::new(ChunkSlot::Cell(coord))
        })
    }

    pub fn get(&self, location: Vec3) -> Option<&Chunk> {
        self.cells.get(&self.cell_of(location))
    }

    pub fn cell(&self, coord: CellCoord) -> Option<&Chunk> {
        self.cells.get(&coord)
    }

    pub fn cell_mut(&mut self, coord: CellCoord) -> Option<&mut Chunk> {
        self.cells.get_mut(&coord)
    }

    /// Erase the chunk mapped to `location`'s cell. The caller must have
    /// checked that it is empty.
    pub fn remove_node(&mut self, location: Vec3) -> Option<Chunk> {
        let coord = self.cell_of(location);
        self.remove_cell(coord)
    }

    pub fn remove_cell(&mut self, coord: CellCoord) -> Option<Chunk> {
        let chunk = self.cells.remove(&coord);
        if chunk.is_some() {
            tracing::debug!(?coord, "collected chunk");
        }
        chunk
    }

    /// Allocated cells whose cube overlaps the axis-aligned cube of half-extent
    /// `radius` around `center`.
    ///
    /// This over-approximates the sphere of that radius; callers re-test the
    /// exact distance on every candidate.
    pub fn cells_overlapping(&self, center: Vec3, radius: f32) -> Vec<CellCoord> {
        let bound_lo = self.cell_of(Vec3::splat(-self.half_extent));
        let bound_hi = self.cell_of(Vec3::splat(self.half_extent));
        let lo = self.cell_of(center - Vec3::splat(radius));
        let hi = self.cell_of(center + Vec3::splat(radius));
        let (x0, x1) = (lo.x.max(bound_lo.x), hi.x.min(bound_hi.x));
        let (y0, y1) = (lo.y.max(bound_lo.y), hi.y.min(bound_hi.y));
        let (z0, z1) = (lo.z.max(bound_lo.z), hi.z.min(bound_hi.z));
        if x0 > x1 || y0 > y1 || z0 > z1 {
            return Vec::new();
        }

        let span = |a: i32, b: i32| a.abs_diff(b) as usize + 1;
        let volume = span(x0, x1)
            .saturating_mul(span(y0, y1))
            .saturating_mul(span(z0, z1));

        // Sparse grids: scanning the allocated cells is cheaper than the cube.
        if volume > self.cells.len() {
            let mut found: Vec<CellCoord> = self
                .cells
                .keys()
                .filter(|c| {
                    (x0..=x1).contains(&c.x) && (y0..=y1).contains(&c.y) && (z0..=z1).contains(&c.z)
                })
                .copied()
                .collect();
            found.sort();
            return found;
        }

        let mut found = Vec::new();
        for x in x0..=x1 {
            for y in y0..=y1 {
                for z in z0..=z1 {
                    let coord = CellCoord::new(x, y, z);
                    if self.cells.contains_key(&coord) {
                        found.push(coord);
                    }
                }
            }
        }
        found
    }

    /// True iff the cube of half-extent `radius` around `center` reaches
    /// outside the gridded volume.
    pub fn cube_exceeds_bounds(&self, center: Vec3, radius: f32) -> bool {
        (center.abs() + Vec3::splat(radius)).max_element() > self.half_extent
    }

    /// Number of allocated chunks.
    pub fn chunk_count(&self) -> usize {
        self.cells.len()
    }

    pub fn chunks(&self) -> impl Iterator<Item = (&CellCoord, &Chunk)> {
        self.cells.iter()
    }
}
