use envmap_compute::{PerFrameHeight, UNWRITTEN};
use serde::{Deserialize, Serialize};

/// One written cell of a frame: index into the height texture and millimetres
/// above the batch's reference height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub index: u32,
    pub value: i16,
}

impl CellUpdate {
    /// Absolute height in metres given the batch reference.
    pub fn height(&self, reference_height: f32) -> f32 {
        PerFrameHeight::decode(i32::from(self.value), reference_height)
    }

    pub(crate) fn is_valid_value(&self) -> bool {
        i32::from(self.value) > UNWRITTEN
    }
}

/// Sparse set of cells a frame wrote, ready to replay on another peer's map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerFrameUpdates {
    /// Side of the height texture these indices refer to.
    pub texture_size: u32,
    /// World height the cell values are offsets from, metres.
    pub reference_height: f32,
    pub cells: Vec<CellUpdate>,
}

impl PerFrameUpdates {
    pub fn new(texture_size: u32, reference_height: f32) -> Self {
        Self {
            texture_size,
            reference_height,
            cells: Vec::new(),
        }
    }

    pub(crate) fn from_scratch(
        texture_size: u32,
        reference_height: f32,
        scratch: &PerFrameHeight,
    ) -> Self {
        let cells = scratch
            .written()
            .filter_map(|(index, value)| {
                Some(CellUpdate {
                    index: u32::try_from(index).ok()?,
                    value: i16::try_from(value).ok()?,
                })
            })
            .collect();
        Self {
            texture_size,
            reference_height,
            cells,
        }
    }

    pub fn push(&mut self, index: u32, value: i16) {
        self.cells.push(CellUpdate { index, value });
    }

    /// Absolute height of `cell`, metres.
    pub fn height_of(&self, cell: &CellUpdate) -> f32 {
        cell.height(self.reference_height)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
