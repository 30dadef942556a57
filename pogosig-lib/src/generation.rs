//! Synthetic device telemetry: GPS fixes and motion sensor samples that look
//! like they came from a handset.
//!
//! Two driving strategies exist:
//!
//! - **Timer**: a background task ticks every ~900 ms and appends a fix when
//!   the tracked position moved, when no fix exists yet, or at random while
//!   stationary. Each telemetry bundle drains what accumulated.
//! - **Guess**: nothing runs in the background; when a bundle is requested the
//!   path from the last fix to the current position is interpolated at one fix
//!   per elapsed second.
//!
//! The two strategies sample course and speed differently; both sets of
//! numbers are kept as [`TIMER_PROFILE`] and [`GUESS_PROFILE`].

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::constants::*;
use crate::error::SigError;
use crate::now_millis;
use crate::signature::{ActivityStatus, DeviceInfo, LocationFix, SensorInfo, SignatureFields};

/// Samples from the triangular distribution on `[lower, upper]` peaking at `mode`.
pub fn random_triangular<R: Rng + ?Sized>(rng: &mut R, lower: f64, upper: f64, mode: f64) -> f64 {
    let mode = mode.clamp(lower, upper);
    let c = (mode - lower) / (upper - lower);
    let u: f64 = rng.r#gen();
    if u <= c {
        lower + (u * (upper - lower) * (mode - lower)).sqrt()
    } else {
        upper - ((1.0 - u) * (upper - lower) * (upper - mode)).sqrt()
    }
}

fn pick<R: Rng + ?Sized, T: Copy>(rng: &mut R, candidates: &[T]) -> T {
    candidates[rng.gen_range(0..candidates.len())]
}

/// Course and speed sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixProfile {
    /// Probability that a fix reports course and speed at all
    pub course_probability: f64,
    pub speed_lower: f64,
    pub speed_upper: f64,
    pub speed_mode: f64,
}

/// Walking pace, course nearly always reported
pub const TIMER_PROFILE: FixProfile = FixProfile {
    course_probability: 0.95,
    speed_lower: 0.2,
    speed_upper: 4.25,
    speed_mode: 1.0,
};

/// Faster travel, course reported less often
pub const GUESS_PROFILE: FixProfile = FixProfile {
    course_probability: 0.85,
    speed_lower: 0.25,
    speed_upper: 9.7,
    speed_mode: 8.2,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Timer { period: Duration },
    Guess,
}

impl Default for GenerationMode {
    fn default() -> Self {
        GenerationMode::Timer {
            period: Duration::from_millis(FIX_TIMER_PERIOD_MS),
        }
    }
}

impl GenerationMode {
    pub fn profile(&self) -> &'static FixProfile {
        match self {
            GenerationMode::Timer { .. } => &TIMER_PROFILE,
            GenerationMode::Guess => &GUESS_PROFILE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeneratorOptions {
    pub mode: GenerationMode,
    /// 32 random hex characters when unset
    pub device_id: Option<String>,
    /// Seeds the sampler, for reproducible output
    pub seed: Option<u64>,
}

/// The player position the generator follows.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackedPosition {
    pub latitude: f64,
    pub longitude: f64,
    /// Randomized per fix when unset or zero
    pub altitude: Option<f64>,
}

impl TrackedPosition {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
        }
    }
}

/// Fields of the outer RPC envelope that must agree with the latest fix.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnvelopeLocation {
    pub accuracy: f64,
    pub ms_since_last_location_fix: i64,
}

/// Telemetry attached to one signature.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryBundle {
    pub location_fix: Vec<LocationFix>,
    pub sensor_info: Vec<SensorInfo>,
    pub device_info: DeviceInfo,
    pub activity_status: ActivityStatus,
    pub unknown27: i32,
}

impl TelemetryBundle {
    pub fn into_fields(self) -> SignatureFields {
        SignatureFields {
            location_fix: Some(self.location_fix),
            sensor_info: Some(self.sensor_info),
            device_info: Some(self.device_info),
            activity_status: Some(self.activity_status),
            unknown27: Some(self.unknown27),
            ..Default::default()
        }
    }
}

/// Mutable generator state shared between the timer task and bundle builds.
#[derive(Debug)]
pub struct GeneratorState {
    rng: StdRng,
    position: TrackedPosition,
    last_position: (f64, f64),
    last_fix: Option<LocationFix>,
    last_fix_timestamp: i64,
    course: f64,
    session_start: i64,
    horizontal_accuracy: f64,
    pending_fixes: Vec<LocationFix>,
}

impl GeneratorState {
    pub fn new(position: TrackedPosition, now: i64, mut rng: StdRng) -> Self {
        let course = (rng.r#gen::<f64>() * 3600.0).round() / 10.0;
        let last_fix_timestamp = now - rng.gen_range(1000..2000);
        let session_start = now - rng.gen_range(4500..5500);
        Self {
            rng,
            position,
            last_position: (position.latitude, position.longitude),
            last_fix: None,
            last_fix_timestamp,
            course,
            session_start,
            horizontal_accuracy: 0.0,
            pending_fixes: Vec::new(),
        }
    }

    pub fn position(&self) -> TrackedPosition {
        self.position
    }

    pub fn set_position(&mut self, position: TrackedPosition) {
        self.position = position;
    }

    pub fn last_fix(&self) -> Option<&LocationFix> {
        self.last_fix.as_ref()
    }

    pub fn last_fix_timestamp(&self) -> i64 {
        self.last_fix_timestamp
    }

    pub fn session_start(&self) -> i64 {
        self.session_start
    }

    pub fn pending_fixes(&self) -> &[LocationFix] {
        &self.pending_fixes
    }

    /// Accuracy drawn for the most recent fix
    pub fn horizontal_accuracy(&self) -> f64 {
        self.horizontal_accuracy
    }

    /// One timer tick: maybe append a fix taken at `when`.
    pub fn update_fixes(&mut self, when: i64, profile: &FixProfile) {
        let current = (self.position.latitude, self.position.longitude);
        let moving = current != self.last_position;
        self.last_position = current;

        let stationary_fix = self.rng.r#gen::<f64>() < STATIONARY_FIX_PROBABILITY;
        if self.last_fix.is_none() || moving || stationary_fix {
            let fix = self.location_fix(when, current.0, current.1, self.position.altitude, profile);
            trace!(when, moving, "Location fix appended");
            self.last_fix = Some(fix.clone());
            self.pending_fixes.push(fix);
            self.last_fix_timestamp = when;
        }
    }

    fn location_fix(
        &mut self,
        when: i64,
        latitude: f64,
        longitude: f64,
        altitude: Option<f64>,
        profile: &FixProfile,
    ) -> LocationFix {
        let rng = &mut self.rng;

        let mut accuracies = Vec::with_capacity(HORIZONTAL_ACCURACY_CANDIDATES.len() + 1);
        accuracies.push(rng.gen_range(66..80) as f64);
        accuracies.extend_from_slice(&HORIZONTAL_ACCURACY_CANDIDATES);
        let horizontal_accuracy = pick(rng, &accuracies);

        let junk = rng.r#gen::<f64>() < JUNK_FIX_PROBABILITY;
        let altitude = if junk {
            0.0
        } else {
            match altitude {
                Some(a) if a != 0.0 => a,
                _ => random_triangular(rng, 300.0, 400.0, 350.0),
            }
        };

        let (mut course, mut speed) = (NO_COURSE, NO_COURSE);
        if rng.r#gen::<f64>() < profile.course_probability {
            course = random_triangular(rng, 0.0, 359.9, self.course);
            speed = random_triangular(rng, profile.speed_lower, profile.speed_upper, profile.speed_mode);
            self.course = course;
        }

        let vertical_accuracy = if horizontal_accuracy >= 65.0 {
            random_triangular(rng, 35.0, 100.0, 65.0)
        } else if horizontal_accuracy > 10.0 {
            pick(rng, &VERTICAL_ACCURACY_MEDIUM)
        } else {
            pick(rng, &VERTICAL_ACCURACY_FINE)
        };

        let timestamp_snapshot = when - self.session_start + rng.gen_range(-100..100);
        self.horizontal_accuracy = horizontal_accuracy;

        LocationFix {
            provider: "fused".to_string(),
            latitude: if junk { JUNK_COORDINATE } else { latitude },
            longitude: if junk { JUNK_COORDINATE } else { longitude },
            altitude,
            provider_status: 3,
            location_type: 1,
            floor: 0,
            course,
            speed,
            vertical_accuracy,
            horizontal_accuracy,
            timestamp_snapshot,
        }
    }

    fn sensor_sample(&mut self) -> SensorInfo {
        let timestamp_snapshot = self.last_fix_timestamp - self.session_start + self.rng.gen_range(-800..800);
        let rng = &mut self.rng;
        SensorInfo {
            timestamp_snapshot,
            linear_acceleration_x: random_triangular(rng, -1.5, 2.5, 0.0),
            linear_acceleration_y: random_triangular(rng, -1.2, 1.4, 0.0),
            linear_acceleration_z: random_triangular(rng, -1.4, 0.9, 0.0),
            magnetic_field_x: random_triangular(rng, -54.0, 50.0, 0.0),
            magnetic_field_y: random_triangular(rng, -51.0, 57.0, -4.8),
            magnetic_field_z: random_triangular(rng, -56.0, 43.0, -30.0),
            magnetic_field_accuracy: pick(rng, &MAGNETIC_FIELD_ACCURACY_CANDIDATES),
            attitude_pitch: random_triangular(rng, -1.5, 1.5, 0.4),
            attitude_yaw: random_triangular(rng, -1.56, 3.1, 0.1),
            attitude_roll: random_triangular(rng, -3.1, 3.1, 0.0),
            rotation_rate_x: random_triangular(rng, -3.1, 3.6, 0.0),
            rotation_rate_y: random_triangular(rng, -3.1, 4.8, 0.0),
            rotation_rate_z: random_triangular(rng, -6.0, 3.5, 0.0),
            gravity_x: random_triangular(rng, -1.0, 1.0, 0.01),
            gravity_y: random_triangular(rng, -1.0, 1.0, -0.4),
            gravity_z: random_triangular(rng, -1.0, 1.0, -0.4),
            status: 3,
        }
    }

    /// Drains pending fixes into a bundle and syncs the envelope with the last fix.
    fn bundle(&mut self, now: i64, envelope: &mut EnvelopeLocation, device_info: &DeviceInfo) -> TelemetryBundle {
        let last_fix = match self.last_fix.clone() {
            Some(fix) => fix,
            None => {
                let profile = TIMER_PROFILE;
                let (lat, lng) = (self.position.latitude, self.position.longitude);
                let fix = self.location_fix(now, lat, lng, self.position.altitude, &profile);
                self.last_fix = Some(fix.clone());
                self.last_fix_timestamp = now;
                fix
            }
        };

        envelope.accuracy = last_fix.horizontal_accuracy;
        envelope.ms_since_last_location_fix = now - self.last_fix_timestamp;

        let location_fix = if self.pending_fixes.is_empty() {
            vec![last_fix]
        } else {
            mem::take(&mut self.pending_fixes)
        };

        TelemetryBundle {
            location_fix,
            sensor_info: vec![self.sensor_sample()],
            device_info: device_info.clone(),
            activity_status: ActivityStatus { stationary: true },
            unknown27: self.rng.gen_range(1000..60000),
        }
    }

    /// Bundle for timer mode. Refreshes the fix first when the last one is
    /// off in both coordinates.
    pub fn generate_from_timer(
        &mut self,
        now: i64,
        envelope: &mut EnvelopeLocation,
        device_info: &DeviceInfo,
    ) -> TelemetryBundle {
        let stale = match &self.last_fix {
            None => true,
            Some(fix) => fix.latitude != self.position.latitude && fix.longitude != self.position.longitude,
        };
        if stale {
            let since_latest = now - self.last_fix_timestamp;
            self.update_fixes(now - since_latest / 2, &TIMER_PROFILE);
        }
        self.bundle(now, envelope, device_info)
    }

    /// Bundle for guess mode: interpolates one fix per elapsed second between
    /// the last known and the current position.
    pub fn generate_from_guess(
        &mut self,
        now: i64,
        envelope: &mut EnvelopeLocation,
        device_info: &DeviceInfo,
    ) -> TelemetryBundle {
        let since_latest = now - self.last_fix_timestamp;
        let seconds = ((since_latest as f64) / 1000.0).round().max(1.0) as i64;

        let (from_lat, from_lng) = self.last_position;
        let step_lat = (self.position.latitude - from_lat) / seconds as f64;
        let step_lng = (self.position.longitude - from_lng) / seconds as f64;

        self.pending_fixes.clear();
        for i in 1..=seconds {
            let when = self.last_fix_timestamp + i * 1000;
            let fix = self.location_fix(
                when,
                from_lat + i as f64 * step_lat,
                from_lng + i as f64 * step_lng,
                None,
                &GUESS_PROFILE,
            );
            self.pending_fixes.push(fix);
        }
        self.last_fix = self.pending_fixes.last().cloned();
        debug!(fixes = self.pending_fixes.len(), "Interpolated location fixes");

        let bundle = self.bundle(now, envelope, device_info);

        self.last_fix_timestamp = now;
        self.last_position = (self.position.latitude, self.position.longitude);
        self.pending_fixes.clear();
        bundle
    }

    fn reset(&mut self) {
        self.last_fix = None;
        self.pending_fixes.clear();
    }
}

/// Tick source for timer mode. Ticks missed while the runtime was busy are
/// not replayed back to back; the cadence restarts from the late tick.
pub(crate) fn fix_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn lock(state: &Mutex<GeneratorState>) -> MutexGuard<'_, GeneratorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Produces telemetry for one session.
///
/// In timer mode a tokio task owns the ticking; it shares state with bundle
/// builds through a mutex, so a drain never interleaves with a tick.
pub struct Generator {
    state: Arc<Mutex<GeneratorState>>,
    mode: GenerationMode,
    device_info: DeviceInfo,
    timer: Option<JoinHandle<()>>,
}

impl Generator {
    /// Creates a generator following `position`. Timer mode spawns its task on
    /// the current tokio runtime and takes the first fix immediately.
    pub fn register(position: TrackedPosition, options: GeneratorOptions) -> Result<Self, SigError> {
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let device_id = options.device_id.unwrap_or_else(|| {
            let mut id = [0u8; 16];
            rng.fill_bytes(&mut id);
            hex::encode(id)
        });

        let now = now_millis();
        let state = Arc::new(Mutex::new(GeneratorState::new(position, now, rng)));

        let timer = match options.mode {
            GenerationMode::Timer { period } => {
                let runtime = tokio::runtime::Handle::try_current()
                    .map_err(|e| SigError::Configuration(format!("Timer mode needs a tokio runtime: {e}")))?;
                lock(&state).update_fixes(now, &TIMER_PROFILE);

                let shared = Arc::clone(&state);
                let handle: JoinHandle<()> = runtime.spawn(async move {
                    let mut ticker = fix_ticker(period);
                    // the first tick completes immediately
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        lock(&shared).update_fixes(now_millis(), &TIMER_PROFILE);
                    }
                });
                Some(handle)
            }
            GenerationMode::Guess => None,
        };

        info!(mode = ?options.mode, %device_id, "Telemetry generator registered");
        Ok(Self {
            state,
            mode: options.mode,
            device_info: DeviceInfo::iphone(device_id),
            timer,
        })
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub fn device_id(&self) -> &str {
        &self.device_info.device_id
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Moves the tracked player position.
    pub fn set_position(&self, position: TrackedPosition) {
        lock(&self.state).set_position(position);
    }

    pub fn position(&self) -> TrackedPosition {
        lock(&self.state).position()
    }

    pub fn last_fix(&self) -> Option<LocationFix> {
        lock(&self.state).last_fix().cloned()
    }

    pub fn pending_fix_count(&self) -> usize {
        lock(&self.state).pending_fixes().len()
    }

    /// Runs one tick by hand at `when` (ms since the epoch).
    pub fn update_fixes_at(&self, when: i64) {
        lock(&self.state).update_fixes(when, self.mode.profile());
    }

    /// Builds the telemetry for one signature and updates `envelope` to match.
    pub fn generate(&self, envelope: &mut EnvelopeLocation) -> TelemetryBundle {
        self.generate_at(now_millis(), envelope)
    }

    pub fn generate_at(&self, now: i64, envelope: &mut EnvelopeLocation) -> TelemetryBundle {
        let mut state = lock(&self.state);
        match self.mode {
            GenerationMode::Timer { .. } => state.generate_from_timer(now, envelope, &self.device_info),
            GenerationMode::Guess => state.generate_from_guess(now, envelope, &self.device_info),
        }
    }

    /// Stops the timer and forgets all fixes.
    pub fn clean(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        lock(&self.state).reset();
        debug!("Telemetry generator cleaned");
    }

    pub fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
