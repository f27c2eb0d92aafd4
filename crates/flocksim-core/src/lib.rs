//! Core engine for a predator/prey boid flocking simulation.
//!
//! The engine is a synchronous, in-process computation library: no I/O, no
//! timers, no suspension points. One call to [`FlockWorld::step`] advances
//! every boid by a single tick; callers own pacing and rendering. Per-tick
//! rule evaluation fans out across an engine-owned worker pool, with every
//! worker reading only the pre-step snapshot and writing only its own boid's
//! output slot.
//!
//! Errors surfaced by the public API leave the engine's visible state exactly
//! as it was before the call. Allocation failure is the one exception: the
//! engine cannot guarantee its invariants after a failed growth or compaction
//! allocation, and such a state is not recoverable.

use flocksim_index::{IndexError, NeighborhoodIndex, UniformGridIndex, wrapped_delta};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by the engine's call surface.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    /// Bad construction parameters; the caller must not proceed with the engine.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Non-finite predator position passed to `step`; the call is rejected and
    /// state is unchanged.
    #[error("predator position ({x}, {y}) is not finite")]
    NonFinitePosition { x: f32, y: f32 },
    /// A removal index out of `[0, count)`; the whole batch is rejected and
    /// state is unchanged.
    #[error("removal index {index} out of range for {count} boids")]
    IndexOutOfRange { index: usize, count: usize },
}

impl From<IndexError> for EngineError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::InvalidConfig(msg) => Self::InvalidConfig(msg),
        }
    }
}

/// High level simulation clock (ticks processed since construction).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Axis-aligned 2D position (SoA column representation).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Velocity applied to a position once per tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Velocity {
    pub vx: f32,
    pub vy: f32,
}

impl Velocity {
    /// Construct a new velocity vector.
    #[must_use]
    pub const fn new(vx: f32, vy: f32) -> Self {
        Self { vx, vy }
    }

    /// Euclidean magnitude.
    #[must_use]
    pub fn speed(self) -> f32 {
        self.vx.hypot(self.vy)
    }
}

/// Internal steering arithmetic helper.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Vec2 {
    x: f32,
    y: f32,
}

impl Vec2 {
    const ZERO: Self = Self { x: 0.0, y: 0.0 };

    const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn length_sq(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    /// Unit vector, or zero when the input has no magnitude.
    fn normalized(self) -> Self {
        let len = self.length();
        if len > 0.0 {
            Self::new(self.x / len, self.y / len)
        } else {
            Self::ZERO
        }
    }

    /// Caps the magnitude at `max` without changing direction.
    fn limited(self, max: f32) -> Self {
        if self.length_sq() > max * max {
            self.normalized() * max
        } else {
            self
        }
    }
}

impl From<Position> for Vec2 {
    fn from(p: Position) -> Self {
        Self::new(p.x, p.y)
    }
}

impl From<Velocity> for Vec2 {
    fn from(v: Velocity) -> Self {
        Self::new(v.vx, v.vy)
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::Div<f32> for Vec2 {
    type Output = Self;
    fn div(self, rhs: f32) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

/// Wraps a coordinate into `[0, extent)`, always non-negative.
fn wrap_position(value: f32, extent: f32) -> f32 {
    if extent <= 0.0 {
        return 0.0;
    }
    let mut v = value % extent;
    if v < 0.0 {
        v += extent;
    }
    // Float rounding can land exactly on the extent after the adjustment.
    if v >= extent {
        v = 0.0;
    }
    v
}

/// Static configuration for a flock world.
///
/// Defaults reproduce the reference tuning: slow boids (`max_speed` 2.5)
/// steered by weak forces, a 50-unit perception radius, and a predator panic
/// response that dominates the flocking terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlockConfig {
    /// Hard cap on boid speed, world units per tick.
    pub max_speed: f32,
    /// Hard cap on each steering force's magnitude.
    pub max_force: f32,
    /// Perception radius for alignment and cohesion.
    pub flock_radius: f32,
    /// Shorter radius inside which separation applies.
    pub separation_radius: f32,
    /// Weight applied to the separation steering term.
    pub separation_weight: f32,
    /// Weight applied to the alignment steering term.
    pub alignment_weight: f32,
    /// Weight applied to the cohesion steering term.
    pub cohesion_weight: f32,
    /// Radius inside which boids flee the predator.
    pub avoidance_radius: f32,
    /// Base weight applied to the predator-avoidance term.
    pub avoidance_weight: f32,
    /// Spatial index cell size; should track the largest interaction radius.
    pub cell_size: f32,
    /// Worker pool size for rule evaluation. `None` uses the available
    /// hardware parallelism; `Some(1)` takes a serial, identical-result path.
    pub workers: Option<usize>,
    /// Optional RNG seed for reproducible initial placement.
    pub rng_seed: Option<u64>,
    /// Maximum number of recent tick summaries retained in memory.
    pub history_capacity: usize,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            max_speed: 2.5,
            max_force: 0.15,
            flock_radius: 50.0,
            separation_radius: 25.0,
            separation_weight: 1.5,
            alignment_weight: 0.3,
            cohesion_weight: 0.5,
            avoidance_radius: 100.0,
            avoidance_weight: 3.0,
            cell_size: 50.0,
            workers: None,
            rng_seed: None,
            history_capacity: 256,
        }
    }
}

impl FlockConfig {
    fn validate(&self) -> Result<(), EngineError> {
        if !self.max_speed.is_finite() || self.max_speed <= 0.0 {
            return Err(EngineError::InvalidConfig("max_speed must be positive"));
        }
        if !self.max_force.is_finite() || self.max_force <= 0.0 {
            return Err(EngineError::InvalidConfig("max_force must be positive"));
        }
        if !self.flock_radius.is_finite() || self.flock_radius <= 0.0 {
            return Err(EngineError::InvalidConfig("flock_radius must be positive"));
        }
        if !self.separation_radius.is_finite()
            || self.separation_radius <= 0.0
            || self.separation_radius > self.flock_radius
        {
            return Err(EngineError::InvalidConfig(
                "separation_radius must be positive and within flock_radius",
            ));
        }
        if !self.avoidance_radius.is_finite() || self.avoidance_radius <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "avoidance_radius must be positive",
            ));
        }
        let weights = [
            self.separation_weight,
            self.alignment_weight,
            self.cohesion_weight,
            self.avoidance_weight,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::InvalidConfig(
                "rule weights must be finite and non-negative",
            ));
        }
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(EngineError::InvalidConfig("cell_size must be positive"));
        }
        if self.workers == Some(0) {
            return Err(EngineError::InvalidConfig(
                "workers must be at least one when set",
            ));
        }
        if self.history_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Summary emitted after each processed tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub tick: Tick,
    pub boid_count: usize,
    pub mean_speed: f32,
}

/// Collection of per-boid columns for hot-path iteration.
#[derive(Debug, Default)]
pub struct BoidColumns {
    positions: Vec<Position>,
    velocities: Vec<Velocity>,
}

impl BoidColumns {
    /// Create a collection with reserved capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
            velocities: Vec::with_capacity(capacity),
        }
    }

    /// Number of active rows in the columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true if there are no active rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a new row onto each column.
    pub fn push(&mut self, position: Position, velocity: Velocity) {
        self.positions.push(position);
        self.velocities.push(velocity);
        self.debug_assert_coherent();
    }

    /// Swap-remove the row at `index` and return its fields.
    pub fn swap_remove(&mut self, index: usize) -> (Position, Velocity) {
        let removed = (
            self.positions.swap_remove(index),
            self.velocities.swap_remove(index),
        );
        self.debug_assert_coherent();
        removed
    }

    /// Immutable access to the positions column.
    #[must_use]
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Mutable access to the positions column.
    #[must_use]
    pub fn positions_mut(&mut self) -> &mut [Position] {
        &mut self.positions
    }

    /// Immutable access to the velocities column.
    #[must_use]
    pub fn velocities(&self) -> &[Velocity] {
        &self.velocities
    }

    /// Mutable access to the velocities column.
    #[must_use]
    pub fn velocities_mut(&mut self) -> &mut [Velocity] {
        &mut self.velocities
    }

    #[inline]
    fn debug_assert_coherent(&self) {
        debug_assert_eq!(self.positions.len(), self.velocities.len());
    }
}

/// Dense contiguous storage for all boids.
///
/// Identity is purely positional: a boid is its current store index, and
/// indices are invalidated by any removal. Callers must not cache indices
/// across a [`BoidStore::remove_batch`] call.
#[derive(Debug, Default)]
pub struct BoidStore {
    columns: BoidColumns,
}

impl BoidStore {
    /// Create a store with reserved capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: BoidColumns::with_capacity(capacity),
        }
    }

    /// Number of live boids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true when no boids are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Borrow the underlying column storage.
    #[must_use]
    pub fn columns(&self) -> &BoidColumns {
        &self.columns
    }

    /// Mutably borrow the underlying column storage.
    #[must_use]
    pub fn columns_mut(&mut self) -> &mut BoidColumns {
        &mut self.columns
    }

    /// Append a boid to the store.
    pub fn spawn(&mut self, position: Position, velocity: Velocity) {
        self.columns.push(position, velocity);
    }

    /// Atomically remove every boid whose index appears in `indices`.
    ///
    /// Duplicates collapse to a single removal. Any out-of-range index fails
    /// the whole call before anything is mutated. Removal is not
    /// order-preserving: each doomed row is swapped with the last live row
    /// and truncated, processed in descending index order so earlier swaps
    /// cannot invalidate later ones. Returns the number of boids removed.
    pub fn remove_batch(&mut self, indices: &[usize]) -> Result<usize, EngineError> {
        if indices.is_empty() {
            return Ok(0);
        }
        let count = self.len();
        for &index in indices {
            if index >= count {
                return Err(EngineError::IndexOutOfRange { index, count });
            }
        }
        let mut doomed: Vec<usize> = indices.to_vec();
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        doomed.dedup();
        for &index in &doomed {
            self.columns.swap_remove(index);
        }
        Ok(doomed.len())
    }
}

/// Zero-copy, read-only projection of the store's current boid data.
///
/// Aliases the live column memory; nothing is allocated. The view is valid
/// only until the next mutating call (`step` or `remove`) on the owning
/// engine, which the borrow checker enforces. Logical columns per row are
/// `px, py, vx, vy`, exposed via [`StateView::row`].
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    positions: &'a [Position],
    velocities: &'a [Velocity],
}

impl StateView<'_> {
    /// Number of boids in the view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when the view is over an empty store.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// The positions column.
    #[must_use]
    pub fn positions(&self) -> &[Position] {
        self.positions
    }

    /// The velocities column.
    #[must_use]
    pub fn velocities(&self) -> &[Velocity] {
        self.velocities
    }

    /// One boid's state as `[px, py, vx, vy]`.
    #[must_use]
    pub fn row(&self, index: usize) -> [f32; 4] {
        let p = self.positions[index];
        let v = self.velocities[index];
        [p.x, p.y, v.vx, v.vy]
    }
}

/// Per-tick inputs shared read-only by every rule-evaluation worker.
#[derive(Debug, Clone, Copy)]
struct RuleContext {
    width: f32,
    height: f32,
    max_speed: f32,
    max_force: f32,
    flock_radius: f32,
    separation_radius_sq: f32,
    separation_weight: f32,
    alignment_weight: f32,
    cohesion_weight: f32,
    avoidance_radius: f32,
    avoidance_weight: f32,
    predator: Vec2,
}

/// Reynolds steering toward `target` expressed in the boid's local
/// (unwrapped) frame: desired velocity at full speed, minus the current
/// velocity, capped at `max_force`.
fn steer_toward(offset: Vec2, velocity: Vec2, max_speed: f32, max_force: f32) -> Vec2 {
    if offset.length_sq() <= f32::EPSILON {
        return Vec2::ZERO;
    }
    (offset.normalized() * max_speed - velocity).limited(max_force)
}

/// Evaluate one boid's next position and velocity from the pre-step snapshot.
fn evaluate_boid(
    i: usize,
    positions: &[Position],
    velocities: &[Velocity],
    index: &UniformGridIndex,
    ctx: &RuleContext,
) -> (Position, Velocity) {
    let pos = Vec2::from(positions[i]);
    let vel = Vec2::from(velocities[i]);

    let mut separation_sum = Vec2::ZERO;
    let mut separation_count = 0usize;
    let mut velocity_sum = Vec2::ZERO;
    let mut position_sum = Vec2::ZERO;
    let mut flock_count = 0usize;

    index.neighbors_within((pos.x, pos.y), ctx.flock_radius, &mut |other, dist_sq| {
        if other == i {
            return;
        }
        let dist_sq = dist_sq.into_inner();
        // Offset from the neighbor to this boid, shortest way around the torus.
        let away = Vec2::new(
            wrapped_delta(pos.x, positions[other].x, ctx.width),
            wrapped_delta(pos.y, positions[other].y, ctx.height),
        );
        // Accumulate the neighbor's position in this boid's unwrapped frame so
        // the cohesion target is meaningful near a world edge.
        position_sum += pos - away;
        velocity_sum += Vec2::from(velocities[other]);
        flock_count += 1;
        if dist_sq < ctx.separation_radius_sq && dist_sq > 1e-2 {
            // Equivalent to unit(away) / dist: inverse-distance weighting.
            separation_sum += away / dist_sq;
            separation_count += 1;
        }
    });

    let mut accel = Vec2::ZERO;

    if separation_count > 0 {
        let mean = separation_sum / separation_count as f32;
        accel += steer_toward(mean, vel, ctx.max_speed, ctx.max_force) * ctx.separation_weight;
    }

    if flock_count > 0 {
        let mean_velocity = velocity_sum / flock_count as f32;
        accel += (mean_velocity - vel).limited(ctx.max_force) * ctx.alignment_weight;

        let mean_position = position_sum / flock_count as f32;
        accel += steer_toward(mean_position - pos, vel, ctx.max_speed, ctx.max_force)
            * ctx.cohesion_weight;
    }

    let from_predator = Vec2::new(
        wrapped_delta(pos.x, ctx.predator.x, ctx.width),
        wrapped_delta(pos.y, ctx.predator.y, ctx.height),
    );
    let predator_dist_sq = from_predator.length_sq();
    if predator_dist_sq < ctx.avoidance_radius * ctx.avoidance_radius {
        let dist = predator_dist_sq.sqrt().max(1.0);
        let flee = steer_toward(from_predator, vel, ctx.max_speed, ctx.max_force * 2.0);
        // Stronger the closer the predator gets; dominates the flocking terms.
        let proximity = (ctx.avoidance_radius / dist).clamp(1.0, 4.0);
        accel += flee * (ctx.avoidance_weight * proximity);
    }

    let next_vel = (vel + accel).limited(ctx.max_speed);
    let next_pos = Position::new(
        wrap_position(pos.x + next_vel.x, ctx.width),
        wrap_position(pos.y + next_vel.y, ctx.height),
    );
    (next_pos, Velocity::new(next_vel.x, next_vel.y))
}

/// The simulation engine: spatially indexed flocking over a dense boid store.
///
/// Not reentrant across ticks: callers serialize `step` and `remove` (which
/// the `&mut self` receivers enforce); only the internal per-tick fan-out is
/// parallel.
pub struct FlockWorld {
    config: FlockConfig,
    width: f32,
    height: f32,
    tick: Tick,
    store: BoidStore,
    index: UniformGridIndex,
    index_dirty: bool,
    pool: Option<rayon::ThreadPool>,
    history: VecDeque<TickSummary>,
    scratch: Vec<(f32, f32)>,
}

impl fmt::Debug for FlockWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlockWorld")
            .field("config", &self.config)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("tick", &self.tick)
            .field("boid_count", &self.store.len())
            .finish()
    }
}

impl FlockWorld {
    /// Instantiate a world with `count` boids at seeded random positions.
    pub fn new(
        count: usize,
        width: f32,
        height: f32,
        config: FlockConfig,
    ) -> Result<Self, EngineError> {
        if count == 0 {
            return Err(EngineError::InvalidConfig("boid count must be non-zero"));
        }
        if !width.is_finite() || width <= 0.0 || !height.is_finite() || height <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "world dimensions must be positive and finite",
            ));
        }
        config.validate()?;

        let workers = config
            .workers
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, usize::from));
        let pool = if workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .map_err(|_| EngineError::InvalidConfig("failed to build worker pool"))?,
            )
        } else {
            None
        };

        let index = UniformGridIndex::new(config.cell_size, width, height)?;
        let mut rng = config.seeded_rng();
        let mut store = BoidStore::with_capacity(count);
        for _ in 0..count {
            let position = Position::new(
                rng.random_range(0.0..width),
                rng.random_range(0.0..height),
            );
            let angle = rng.random_range(0.0..std::f32::consts::TAU);
            let speed = rng.random_range(0.4..1.0) * config.max_speed;
            let velocity = Velocity::new(angle.cos() * speed, angle.sin() * speed);
            store.spawn(position, velocity);
        }

        debug!(count, width, height, workers, "created flock world");
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            width,
            height,
            tick: Tick::zero(),
            store,
            index,
            index_dirty: true,
            pool,
            history: VecDeque::with_capacity(history_capacity),
            scratch: Vec::with_capacity(count),
        })
    }

    /// World extents as `(width, height)`.
    #[must_use]
    pub const fn extent(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    /// Current number of live boids.
    #[must_use]
    pub fn count(&self) -> usize {
        self.store.len()
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &FlockConfig {
        &self.config
    }

    /// Read-only access to the boid store.
    #[must_use]
    pub fn store(&self) -> &BoidStore {
        &self.store
    }

    /// Mutable access to the boid store. Any mutation invalidates the
    /// spatial index until the next rebuild.
    #[must_use]
    pub fn store_mut(&mut self) -> &mut BoidStore {
        self.index_dirty = true;
        &mut self.store
    }

    /// Zero-copy view of the current boid state. See [`StateView`] for the
    /// validity contract.
    #[must_use]
    pub fn state(&self) -> StateView<'_> {
        StateView {
            positions: self.store.columns().positions(),
            velocities: self.store.columns().velocities(),
        }
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    fn rebuild_index(&mut self) -> Result<(), EngineError> {
        self.scratch.clear();
        self.scratch
            .extend(self.store.columns().positions().iter().map(|p| (p.x, p.y)));
        self.index.rebuild(&self.scratch)?;
        self.index_dirty = false;
        Ok(())
    }

    /// Indices of all boids within `radius` of `point` (exact wrapped
    /// distance), ascending and deduplicated. Rebuilds the index first if the
    /// store has mutated since the last rebuild.
    pub fn boids_within(
        &mut self,
        point: (f32, f32),
        radius: f32,
    ) -> Result<Vec<usize>, EngineError> {
        if self.index_dirty {
            self.rebuild_index()?;
        }
        let mut found = Vec::new();
        self.index
            .neighbors_within(point, radius, &mut |idx, _| found.push(idx));
        found.sort_unstable();
        found.dedup();
        Ok(found)
    }

    /// Exact nearest boid to `point` and its wrapped distance.
    pub fn nearest_boid(&mut self, point: (f32, f32)) -> Result<Option<(usize, f32)>, EngineError> {
        if self.index_dirty {
            self.rebuild_index()?;
        }
        Ok(self
            .index
            .nearest(point)
            .map(|(idx, dist_sq)| (idx, dist_sq.into_inner().sqrt())))
    }

    /// Arithmetic mean of all boid positions, or `None` for an empty store.
    #[must_use]
    pub fn centroid(&self) -> Option<(f32, f32)> {
        let positions = self.store.columns().positions();
        if positions.is_empty() {
            return None;
        }
        let mut sum = Vec2::ZERO;
        for p in positions {
            sum += Vec2::from(*p);
        }
        let inv = 1.0 / positions.len() as f32;
        Some((sum.x * inv, sum.y * inv))
    }

    /// Execute one simulation tick.
    ///
    /// Strictly in order: rebuild the spatial index from the current
    /// snapshot, evaluate the flocking rules for every boid against that
    /// snapshot only, then commit all position/velocity updates. The result
    /// depends only on the state at the start of the call and
    /// `predator_pos`; boid rules contain no randomness.
    pub fn step(&mut self, predator_pos: (f32, f32)) -> Result<TickSummary, EngineError> {
        let (px, py) = predator_pos;
        if !px.is_finite() || !py.is_finite() {
            return Err(EngineError::NonFinitePosition { x: px, y: py });
        }

        self.rebuild_index()?;

        let ctx = RuleContext {
            width: self.width,
            height: self.height,
            max_speed: self.config.max_speed,
            max_force: self.config.max_force,
            flock_radius: self.config.flock_radius,
            separation_radius_sq: self.config.separation_radius * self.config.separation_radius,
            separation_weight: self.config.separation_weight,
            alignment_weight: self.config.alignment_weight,
            cohesion_weight: self.config.cohesion_weight,
            avoidance_radius: self.config.avoidance_radius,
            avoidance_weight: self.config.avoidance_weight,
            predator: Vec2::new(px, py),
        };

        let boid_count = self.store.len();
        let results: Vec<(Position, Velocity)> = {
            let columns = self.store.columns();
            let positions = columns.positions();
            let velocities = columns.velocities();
            let index = &self.index;
            match &self.pool {
                Some(pool) => pool.install(|| {
                    (0..boid_count)
                        .into_par_iter()
                        .map(|i| evaluate_boid(i, positions, velocities, index, &ctx))
                        .collect()
                }),
                None => (0..boid_count)
                    .map(|i| evaluate_boid(i, positions, velocities, index, &ctx))
                    .collect(),
            }
        };

        {
            let positions = self.store.columns_mut().positions_mut();
            for (i, (pos, _)) in results.iter().enumerate() {
                positions[i] = *pos;
            }
        }
        {
            let velocities = self.store.columns_mut().velocities_mut();
            for (i, (_, vel)) in results.iter().enumerate() {
                velocities[i] = *vel;
            }
        }
        self.index_dirty = true;
        self.tick = self.tick.next();

        let mean_speed = if boid_count > 0 {
            let total: f32 = self
                .store
                .columns()
                .velocities()
                .iter()
                .map(|v| v.speed())
                .sum();
            total / boid_count as f32
        } else {
            0.0
        };
        let summary = TickSummary {
            tick: self.tick,
            boid_count,
            mean_speed,
        };
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary.clone());
        Ok(summary)
    }

    /// Atomically remove a batch of boids between ticks.
    ///
    /// All-or-nothing: duplicates collapse, any out-of-range index rejects
    /// the whole batch with state unchanged. Returns the number removed.
    /// Index sets must come from the current state; an intervening `step` or
    /// `remove` invalidates previously computed indices.
    pub fn remove(&mut self, indices: &[usize]) -> Result<usize, EngineError> {
        let removed = self.store.remove_batch(indices)?;
        if removed > 0 {
            self.index_dirty = true;
            debug!(removed, remaining = self.store.len(), "removed boids");
        }
        Ok(removed)
    }
}

/// Tuning for the predator's steering and sensing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PredatorConfig {
    /// Hard cap on predator speed, world units per tick.
    pub max_speed: f32,
    /// Hard cap on each steering force's magnitude.
    pub max_force: f32,
    /// Distance at which the predator switches from seeking to hunting.
    pub hunt_radius: f32,
    /// Contact distance at which boids are eaten.
    pub eat_radius: f32,
}

impl Default for PredatorConfig {
    fn default() -> Self {
        Self {
            max_speed: 3.5,
            max_force: 0.2,
            hunt_radius: 200.0,
            eat_radius: 20.0,
        }
    }
}

/// Behavior the predator selected for a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuntMode {
    /// No boid within the hunt radius; steering toward the flock centroid.
    Seeking,
    /// Chasing the nearest boid.
    Hunting,
}

/// Result of one predator decision tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuntOutcome {
    /// Store indices of boids caught this tick, ascending and deduplicated.
    /// Feed this to [`FlockWorld::remove`] before the next `step`.
    pub eaten: Vec<usize>,
    /// The behavior mode selected after eat detection.
    pub mode: HuntMode,
}

const WANDER_JITTER: f32 = 0.25;
const WANDER_RADIUS: f32 = 2.0;
const WANDER_DISTANCE: f32 = 4.0;
const HUNT_GAIN: f32 = 2.0;
const SEEK_GAIN: f32 = 1.0;
const WANDER_GAIN: f32 = 0.5;

/// The single adversarial agent.
///
/// Re-evaluated from scratch every tick; the only state carried across ticks
/// beyond kinematics is the accumulated wander heading and the eaten
/// counter. Wandering draws from a private, explicitly seeded random stream
/// so runs are reproducible per instance.
#[derive(Debug)]
pub struct Predator {
    position: Vec2,
    velocity: Vec2,
    config: PredatorConfig,
    wander_angle: f32,
    boids_eaten: u64,
    rng: SmallRng,
}

impl Predator {
    /// Construct a predator at `(x, y)` with its own seeded RNG.
    pub fn new(x: f32, y: f32, config: PredatorConfig, seed: u64) -> Result<Self, EngineError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(EngineError::InvalidConfig(
                "predator position must be finite",
            ));
        }
        let limits = [config.max_speed, config.max_force];
        if limits.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(EngineError::InvalidConfig(
                "predator speed and force limits must be positive",
            ));
        }
        if !config.hunt_radius.is_finite()
            || config.hunt_radius <= 0.0
            || !config.eat_radius.is_finite()
            || config.eat_radius <= 0.0
        {
            return Err(EngineError::InvalidConfig(
                "predator radii must be positive",
            ));
        }
        Ok(Self {
            position: Vec2::new(x, y),
            velocity: Vec2::ZERO,
            config,
            wander_angle: 0.0,
            boids_eaten: 0,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Current position.
    #[must_use]
    pub const fn position(&self) -> (f32, f32) {
        (self.position.x, self.position.y)
    }

    /// Current velocity.
    #[must_use]
    pub const fn velocity(&self) -> (f32, f32) {
        (self.velocity.x, self.velocity.y)
    }

    /// Total boids eaten since construction.
    #[must_use]
    pub const fn boids_eaten(&self) -> u64 {
        self.boids_eaten
    }

    /// The predator's tuning.
    #[must_use]
    pub const fn config(&self) -> &PredatorConfig {
        &self.config
    }

    fn seek(&self, target: (f32, f32), width: f32, height: f32) -> Vec2 {
        let offset = Vec2::new(
            wrapped_delta(target.0, self.position.x, width),
            wrapped_delta(target.1, self.position.y, height),
        );
        steer_toward(offset, self.velocity, self.config.max_speed, self.config.max_force)
    }

    fn wander(&mut self) -> Vec2 {
        self.wander_angle += self.rng.random_range(-WANDER_JITTER..WANDER_JITTER);
        // Project a point on a small circle ahead of the current heading.
        let ahead = self.velocity.normalized() * WANDER_DISTANCE;
        let displacement = Vec2::new(
            WANDER_RADIUS * self.wander_angle.cos(),
            WANDER_RADIUS * self.wander_angle.sin(),
        );
        (ahead + displacement).limited(self.config.max_force)
    }

    /// Run one predator decision tick against the world's current state.
    ///
    /// Eat detection happens first, against the position snapshot taken
    /// before the predator moves: every boid within the eat radius joins the
    /// tick's removal batch and bumps the eaten counter. The caller applies
    /// the batch via [`FlockWorld::remove`] and feeds the predator's new
    /// position into the next [`FlockWorld::step`]. Fails only when the
    /// world's index cannot be rebuilt, leaving the predator untouched.
    pub fn hunt(&mut self, world: &mut FlockWorld) -> Result<HuntOutcome, EngineError> {
        let (width, height) = world.extent();
        let origin = (self.position.x, self.position.y);

        let eaten = world.boids_within(origin, self.config.eat_radius)?;
        self.boids_eaten += eaten.len() as u64;

        let hunting_target = match world.nearest_boid(origin)? {
            Some((idx, dist)) if dist < self.config.hunt_radius => {
                let target = world.state().positions()[idx];
                Some((target.x, target.y))
            }
            _ => None,
        };
        let (mode, target, gain) = match hunting_target {
            Some(target) => (HuntMode::Hunting, target, HUNT_GAIN),
            None => (
                HuntMode::Seeking,
                world.centroid().unwrap_or(origin),
                SEEK_GAIN,
            ),
        };

        let steer = self.seek(target, width, height) * gain + self.wander() * WANDER_GAIN;
        self.velocity = (self.velocity + steer).limited(self.config.max_speed);
        self.position = Vec2::new(
            wrap_position(self.position.x + self.velocity.x, width),
            wrap_position(self.position.y + self.velocity.y, height),
        );

        Ok(HuntOutcome { eaten, mode })
    }
}
