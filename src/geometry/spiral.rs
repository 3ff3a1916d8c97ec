use crate::world::{ChunkKey, DimensionId};

/// Lazy sequence of chunk keys spiralling outward from a centre chunk.
///
/// Starts at the centre, then walks arms of growing length: `+x 1, +z 1,
/// -x 2, -z 2, +x 3, +z 3, ...`. The first `(2r + 1)^2` keys cover the square
/// of radius `r` exactly once. Not rewindable; build a new one to restart.
#[derive(Debug, Clone)]
pub struct GridSpiral {
    dimension: DimensionId,
    cx: i64,
    cz: i64,
    remaining: u64,
    sign: i64,
    arm_length: u64,
    /// Steps taken on the current arm
    step: u64,
    /// false while walking along x, true along z
    on_z_arm: bool,
}

impl GridSpiral {
    pub fn new(dimension: DimensionId, cx: i64, cz: i64, radius: u32) -> Self {
        let side = 2 * u64::from(radius) + 1;
        Self {
            dimension,
            cx,
            cz,
            remaining: side * side,
            sign: 1,
            arm_length: 1,
            step: 0,
            on_z_arm: false,
        }
    }

    fn advance(&mut self) {
        if self.on_z_arm {
            self.cz += self.sign;
        } else {
            self.cx += self.sign;
        }
        self.step += 1;
        if self.step == self.arm_length {
            self.step = 0;
            if self.on_z_arm {
                self.sign = -self.sign;
                self.arm_length += 1;
            }
            self.on_z_arm = !self.on_z_arm;
        }
    }
}

impl Iterator for GridSpiral {
    type Item = ChunkKey;

    fn next(&mut self) -> Option<ChunkKey> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let key = ChunkKey::new(self.dimension.clone(), self.cx, self.cz);
        self.advance();
        Some(key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}
