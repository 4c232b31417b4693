//! Polygon collision: SAT narrow phase, the active-collider registry and the
//! per-frame enter/exit diff.

use log::trace;

use crate::error::ShapeError;
use crate::math::{Matrix, Vec2};
use crate::node::{NodeEvent, NodeId};
use crate::path::{Path, CIRCLE_SEGMENTS};
use crate::pool::PoolManager;
use crate::scene::SceneTree;

/// A simple polygon in local space with at least three vertices and
/// non-zero area.
#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    points: Vec<Vec2>,
}

impl Polygon {
    pub fn new(points: Vec<Vec2>) -> Result<Self, ShapeError> {
        if points.len() < 3 {
            return Err(ShapeError::TooFewVertices(points.len()));
        }
        if signed_area(&points).abs() <= f32::EPSILON {
            return Err(ShapeError::Degenerate);
        }
        Ok(Self { points })
    }

    pub fn rect(x: f32, y: f32, width: f32, height: f32) -> Result<Self, ShapeError> {
        Self::new(vec![
            Vec2::new(x, y),
            Vec2::new(x + width, y),
            Vec2::new(x + width, y + height),
            Vec2::new(x, y + height),
        ])
    }

    /// Regular polygon approximating a circle.
    pub fn circle(center: Vec2, radius: f32) -> Result<Self, ShapeError> {
        Self::new(
            (0..CIRCLE_SEGMENTS)
                .map(|i| {
                    let angle = i as f32 / CIRCLE_SEGMENTS as f32 * std::f32::consts::TAU;
                    center + Vec2::from_angle(angle) * radius
                })
                .collect(),
        )
    }

    /// Outline of the first sub-path of `path`. A closing point equal to the
    /// first one is dropped.
    pub fn from_path(path: &Path) -> Result<Self, ShapeError> {
        let mut points = path.subpaths().next().map(<[Vec2]>::to_vec).unwrap_or_default();
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        Self::new(points)
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    /// Vertex average.
    pub fn centroid(&self) -> Vec2 {
        centroid(&self.points)
    }
}

fn signed_area(points: &[Vec2]) -> f32 {
    let n = points.len();
    (0..n)
        .map(|i| points[i].cross(points[(i + 1) % n]))
        .sum::<f32>()
        * 0.5
}

fn centroid(points: &[Vec2]) -> Vec2 {
    if points.is_empty() {
        return Vec2::ZERO;
    }
    let sum = points.iter().fold(Vec2::ZERO, |acc, &p| acc + p);
    sum / points.len() as f32
}

fn project(points: &[Vec2], axis: Vec2) -> (f32, f32) {
    points.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), p| {
        let d = p.dot(axis);
        (min.min(d), max.max(d))
    })
}

/// Separating-axis test between two convex polygons.
///
/// Returns the minimum translation vector that, added to `p`, pushes it out
/// of `q`, or `None` when a separating axis exists. Touching shapes report a
/// zero-length vector.
pub fn sat_collision(p: &[Vec2], q: &[Vec2]) -> Option<Vec2> {
    let mut best_axis = None;
    let mut best_overlap = f32::INFINITY;

    for shape in [p, q] {
        let n = shape.len();
        for i in 0..n {
            let edge = shape[(i + 1) % n] - shape[i];
            if edge.length_squared() == 0.0 {
                continue;
            }
            let axis = edge.perp().normalized();

            let (min_p, max_p) = project(p, axis);
            let (min_q, max_q) = project(q, axis);
            if max_p < min_q || max_q < min_p {
                return None;
            }

            let overlap = max_p.min(max_q) - min_p.max(min_q);
            if overlap < best_overlap {
                best_overlap = overlap;
                best_axis = Some(axis);
            }
        }
    }

    let axis = best_axis?;
    let mtv = axis * best_overlap;
    if (centroid(p) - centroid(q)).dot(mtv) < 0.0 {
        Some(-mtv)
    } else {
        Some(mtv)
    }
}

/// Even-odd rule: cast a horizontal ray from `point` and count edge
/// crossings.
pub fn point_in_polygon(point: Vec2, polygon: &[Vec2]) -> bool {
    let n = polygon.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > point.y) != (pj.y > point.y)
            && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Collision component: a local polygon plus its world-space copy.
#[derive(Debug)]
pub struct Collision {
    polygon: Polygon,
    world_points: Vec<Vec2>,
    shape_ready: bool,
    /// Nodes touched during the previous collision step.
    contacts: Vec<NodeId>,
}

impl Collision {
    pub fn new(polygon: Polygon) -> Self {
        Self {
            polygon,
            world_points: Vec::new(),
            shape_ready: false,
            contacts: Vec::new(),
        }
    }

    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    /// Swap the local shape; the world shape refreshes on the next build.
    pub fn set_polygon(&mut self, polygon: Polygon) {
        self.polygon = polygon;
        self.shape_ready = false;
    }

    /// World-space vertices from the last build phase.
    pub fn world_points(&self) -> &[Vec2] {
        &self.world_points
    }

    pub fn is_shape_ready(&self) -> bool {
        self.shape_ready
    }

    pub fn contacts(&self) -> &[NodeId] {
        &self.contacts
    }

    pub(crate) fn update_world_shape(&mut self, pool: &mut PoolManager, matrix: &Matrix) {
        let local = self.polygon.points();
        if self.world_points.len() != local.len() {
            pool.release_all(self.world_points.drain(..));
            self.world_points
                .extend(local.iter().map(|_| pool.acquire::<Vec2>((0.0, 0.0))));
        }
        for (world, &p) in self.world_points.iter_mut().zip(local) {
            *world = matrix.apply(p);
        }
        self.shape_ready = true;
    }

    pub(crate) fn reset_contacts(&mut self) {
        self.contacts.clear();
        self.shape_ready = false;
    }

    pub(crate) fn release(&mut self, pool: &mut PoolManager) {
        pool.release_all(self.world_points.drain(..));
        self.contacts.clear();
        self.shape_ready = false;
    }
}

/// Colliders currently in the tree, in registration order. Holds ids only.
#[derive(Debug, Default)]
pub struct PhysicsManager {
    bodies: Vec<NodeId>,
}

impl PhysicsManager {
    pub(crate) fn add(&mut self, id: NodeId) {
        if !self.bodies.contains(&id) {
            self.bodies.push(id);
        }
    }

    pub(crate) fn remove(&mut self, id: NodeId) {
        self.bodies.retain(|&b| b != id);
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.bodies.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.bodies.iter().copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionResult {
    pub body: NodeId,
    /// MTV pushing the queried node out of `body`.
    pub overlap: Vec2,
}

impl SceneTree {
    fn world_shape(&self, id: NodeId) -> Option<&[Vec2]> {
        self.get(id)
            .and_then(|n| n.collision.as_ref())
            .filter(|c| c.is_shape_ready())
            .map(Collision::world_points)
    }

    /// Every registered collider overlapping `id`'s current world shape.
    pub fn collision_detection(&self, id: NodeId) -> Vec<CollisionResult> {
        let Some(shape) = self.world_shape(id) else {
            return Vec::new();
        };
        self.physics
            .iter()
            .filter(|&other| other != id)
            .filter_map(|other| {
                let other_shape = self.world_shape(other)?;
                sat_collision(shape, other_shape).map(|overlap| CollisionResult {
                    body: other,
                    overlap,
                })
            })
            .collect()
    }

    /// Diff each collider's contacts against the previous step and queue
    /// [`NodeEvent::CollisionEnter`] / [`NodeEvent::CollisionExit`].
    pub fn step_collisions(&mut self) {
        let bodies: Vec<NodeId> = self.physics.iter().collect();
        let results: Vec<_> = bodies
            .iter()
            .map(|&id| (id, self.collision_detection(id)))
            .collect();

        for (id, hits) in results {
            let Some(collision) = self.get_mut(id).and_then(|n| n.collision.as_mut()) else {
                continue;
            };
            let previous = std::mem::take(&mut collision.contacts);
            collision.contacts = hits.iter().map(|hit| hit.body).collect();

            let mut events = Vec::new();
            for hit in &hits {
                if !previous.contains(&hit.body) {
                    events.push(NodeEvent::CollisionEnter {
                        other: hit.body,
                        overlap: hit.overlap,
                    });
                }
            }
            for other in previous {
                if !hits.iter().any(|hit| hit.body == other) {
                    events.push(NodeEvent::CollisionExit { other });
                }
            }

            if !events.is_empty() {
                trace!("{id:?}: {} collision event(s)", events.len());
            }
            for event in events {
                self.queue_event(id, event);
            }
        }
    }

    /// Colliders whose world shape contains `point`, in registration order.
    pub fn hit_test(&self, point: Vec2) -> Vec<NodeId> {
        self.physics
            .iter()
            .filter(|&id| {
                self.world_shape(id)
                    .is_some_and(|shape| point_in_polygon(point, shape))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(x: f32, y: f32, size: f32) -> Vec<Vec2> {
        Polygon::rect(x, y, size, size).unwrap().points().to_vec()
    }

    fn translated(points: &[Vec2], by: Vec2) -> Vec<Vec2> {
        points.iter().map(|&p| p + by).collect()
    }

    #[test]
    fn rejects_degenerate_polygons() {
        assert_eq!(
            Polygon::new(vec![Vec2::ZERO, Vec2::ONE]),
            Err(ShapeError::TooFewVertices(2))
        );
        assert_eq!(
            Polygon::new(vec![Vec2::ZERO, Vec2::ONE, Vec2::new(2.0, 2.0)]),
            Err(ShapeError::Degenerate)
        );
    }

    #[test]
    fn separated_polygons_do_not_collide() {
        let p = square(0.0, 0.0, 10.0);
        let q = square(20.0, 3.0, 10.0);
        assert_eq!(sat_collision(&p, &q), None);

        let triangle = vec![Vec2::new(11.0, 0.0), Vec2::new(30.0, 0.0), Vec2::new(30.0, 19.0)];
        assert_eq!(sat_collision(&p, &triangle), None);
    }

    #[test]
    fn mtv_points_from_q_towards_p() {
        let p = square(0.0, 0.0, 10.0);
        let q = square(8.0, 1.0, 10.0);
        let mtv = sat_collision(&p, &q).unwrap();
        assert_relative_eq!(mtv.x, -2.0, epsilon = 1e-5);
        assert_relative_eq!(mtv.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn moving_q_by_the_mtv_separates_the_pair() {
        let p = square(0.0, 0.0, 10.0);
        let mut transform = Matrix::IDENTITY;
        transform.translate(6.0, 4.0);
        transform.rotate(0.4);
        let q: Vec<Vec2> = square(0.0, 0.0, 8.0)
            .into_iter()
            .map(|pt| transform.apply(pt))
            .collect();

        let mtv = sat_collision(&p, &q).unwrap();
        assert!(mtv.length() > 0.0);

        let moved = translated(&q, -mtv * 1.001);
        assert_eq!(sat_collision(&p, &moved), None);
        let moved_p = translated(&p, mtv * 1.001);
        assert_eq!(sat_collision(&moved_p, &q), None);
    }

    #[test]
    fn touching_edges_count_as_contact() {
        let p = square(0.0, 0.0, 10.0);
        let q = square(10.0, 0.0, 10.0);
        let mtv = sat_collision(&p, &q).unwrap();
        assert_relative_eq!(mtv.length(), 0.0);
    }

    #[test]
    fn even_odd_point_in_polygon() {
        // A concave "U" shape.
        let u = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(3.0, 0.0),
            Vec2::new(3.0, 3.0),
            Vec2::new(2.0, 3.0),
            Vec2::new(2.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 3.0),
            Vec2::new(0.0, 3.0),
        ];
        assert!(point_in_polygon(Vec2::new(0.5, 2.0), &u));
        assert!(point_in_polygon(Vec2::new(1.5, 0.5), &u));
        assert!(!point_in_polygon(Vec2::new(1.5, 2.0), &u));
        assert!(!point_in_polygon(Vec2::new(-1.0, 1.0), &u));
    }

    #[test]
    fn from_path_drops_closing_point() {
        let mut pool = PoolManager::with_defaults();
        let mut path = Path::new();
        path.polygon_path(
            &mut pool,
            &[Vec2::new(0.0, 0.0), Vec2::new(4.0, 0.0), Vec2::new(0.0, 3.0)],
        );
        let polygon = Polygon::from_path(&path).unwrap();
        assert_eq!(polygon.points().len(), 3);
        assert_relative_eq!(polygon.centroid().x, 4.0 / 3.0);
    }

    #[test]
    fn world_shape_reuses_pooled_points() {
        let mut pool = PoolManager::with_defaults();
        let mut collision = Collision::new(Polygon::rect(0.0, 0.0, 2.0, 2.0).unwrap());
        let mut m = Matrix::IDENTITY;
        m.translate(5.0, 5.0);

        collision.update_world_shape(&mut pool, &m);
        assert!(collision.is_shape_ready());
        assert_eq!(collision.world_points()[2], Vec2::new(7.0, 7.0));

        collision.release(&mut pool);
        assert_eq!(pool.free_len::<Vec2>(), 4);
        collision.update_world_shape(&mut pool, &m);
        assert_eq!(pool.free_len::<Vec2>(), 0);
    }
}
