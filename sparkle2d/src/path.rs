//! Polyline / polygon accumulator shared by collision shapes and the
//! primitive compositor.

use crate::math::{Rect, Vec2};
use crate::pool::PoolManager;

/// Segments used when flattening a circle.
pub const CIRCLE_SEGMENTS: usize = 32;

/// A list of points grouped into sub-paths.
///
/// `move_to` starts a sub-path, `line_to` extends it. Points are acquired
/// from the pool and handed back by [`Path::begin_path`] / [`Path::release`].
#[derive(Debug)]
pub struct Path {
    points: Vec<Vec2>,
    /// `true` where a point begins a new sub-path.
    starts: Vec<bool>,
    cursor: Vec2,
    pending_move: bool,
}

impl Path {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            starts: Vec::new(),
            cursor: Vec2::ZERO,
            pending_move: true,
        }
    }

    /// Clear the path, returning its points to the pool.
    pub fn begin_path(&mut self, pool: &mut PoolManager) {
        self.release(pool);
        self.cursor = Vec2::ZERO;
        self.pending_move = true;
    }

    pub fn release(&mut self, pool: &mut PoolManager) {
        pool.release_all(self.points.drain(..));
        self.starts.clear();
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        self.cursor = Vec2::new(x, y);
        self.pending_move = true;
    }

    pub fn line_to(&mut self, pool: &mut PoolManager, x: f32, y: f32) {
        if self.pending_move {
            let start = pool.acquire::<Vec2>((self.cursor.x, self.cursor.y));
            self.points.push(start);
            self.starts.push(true);
            self.pending_move = false;
        }
        self.points.push(pool.acquire::<Vec2>((x, y)));
        self.starts.push(false);
        self.cursor = Vec2::new(x, y);
    }

    /// Line back to the first point of the current sub-path.
    pub fn close_path(&mut self, pool: &mut PoolManager) {
        let first = self
            .starts
            .iter()
            .rposition(|&s| s)
            .map(|i| self.points[i]);
        if let Some(first) = first {
            if self.points.last() != Some(&first) {
                self.line_to(pool, first.x, first.y);
            }
        }
    }

    pub fn rect_path(&mut self, pool: &mut PoolManager, rect: &Rect) {
        self.move_to(rect.x, rect.y);
        self.line_to(pool, rect.x + rect.w, rect.y);
        self.line_to(pool, rect.x + rect.w, rect.y + rect.h);
        self.line_to(pool, rect.x, rect.y + rect.h);
        self.line_to(pool, rect.x, rect.y);
    }

    /// Closed outline through `points`. Fewer than two points adds nothing.
    pub fn polygon_path(&mut self, pool: &mut PoolManager, points: &[Vec2]) {
        let Some((first, rest)) = points.split_first() else {
            return;
        };
        if rest.is_empty() {
            return;
        }
        self.move_to(first.x, first.y);
        for p in rest {
            self.line_to(pool, p.x, p.y);
        }
        self.line_to(pool, first.x, first.y);
    }

    /// Closed circle approximation centred on `center`.
    pub fn circle_path(&mut self, pool: &mut PoolManager, center: Vec2, radius: f32) {
        self.move_to(center.x + radius, center.y);
        for i in 1..=CIRCLE_SEGMENTS {
            let angle = i as f32 / CIRCLE_SEGMENTS as f32 * std::f32::consts::TAU;
            let p = center + Vec2::from_angle(angle) * radius;
            self.line_to(pool, p.x, p.y);
        }
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Every line segment, in insertion order.
    pub fn segments(&self) -> impl Iterator<Item = (Vec2, Vec2)> + '_ {
        self.points
            .windows(2)
            .zip(self.starts.iter().skip(1))
            .filter(|(_, &starts_new)| !starts_new)
            .map(|(pair, _)| (pair[0], pair[1]))
    }

    /// Each sub-path as a contiguous slice of points.
    pub fn subpaths(&self) -> impl Iterator<Item = &[Vec2]> + '_ {
        let mut begin = 0;
        std::iter::from_fn(move || {
            if begin >= self.points.len() {
                return None;
            }
            let mut end = begin + 1;
            while end < self.points.len() && !self.starts[end] {
                end += 1;
            }
            let slice = &self.points[begin..end];
            begin = end;
            Some(slice)
        })
    }
}

impl Default for Path {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_path_yields_four_segments() {
        let mut pool = PoolManager::with_defaults();
        let mut path = Path::new();
        path.rect_path(&mut pool, &Rect::new(0.0, 0.0, 10.0, 5.0));

        let segments: Vec<_> = path.segments().collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], (Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0)));
        assert_eq!(segments[3], (Vec2::new(0.0, 5.0), Vec2::new(0.0, 0.0)));
    }

    #[test]
    fn move_to_splits_subpaths() {
        let mut pool = PoolManager::with_defaults();
        let mut path = Path::new();
        path.move_to(0.0, 0.0);
        path.line_to(&mut pool, 1.0, 0.0);
        path.move_to(5.0, 5.0);
        path.line_to(&mut pool, 6.0, 5.0);
        path.line_to(&mut pool, 6.0, 6.0);

        assert_eq!(path.segments().count(), 3);
        let subpaths: Vec<_> = path.subpaths().map(|s| s.len()).collect();
        assert_eq!(subpaths, vec![2, 3]);
    }

    #[test]
    fn begin_path_returns_points_to_pool() {
        let mut pool = PoolManager::with_defaults();
        let mut path = Path::new();
        path.polygon_path(
            &mut pool,
            &[Vec2::new(0.0, 0.0), Vec2::new(4.0, 0.0), Vec2::new(0.0, 4.0)],
        );
        assert_eq!(path.points().len(), 4);
        assert_eq!(pool.free_len::<Vec2>(), 0);

        path.begin_path(&mut pool);
        assert!(path.is_empty());
        assert_eq!(pool.free_len::<Vec2>(), 4);
    }

    #[test]
    fn close_path_returns_to_subpath_start() {
        let mut pool = PoolManager::with_defaults();
        let mut path = Path::new();
        path.move_to(1.0, 1.0);
        path.line_to(&mut pool, 3.0, 1.0);
        path.line_to(&mut pool, 3.0, 3.0);
        path.close_path(&mut pool);

        assert_eq!(path.points().last(), Some(&Vec2::new(1.0, 1.0)));
        assert_eq!(path.segments().count(), 3);
    }
}
