use bevy::math::bounding::{Aabb2d, BoundingCircle, IntersectsVolume};
use bevy::prelude::*;
use rand::{Rng, RngCore};
use std::time::Duration;

#[derive(States, Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum AppState {
    #[default]
    Ready,
    Playing,
    GameOver,
}

#[derive(Resource)]
pub struct SeededRng(pub rand::rngs::StdRng);

#[derive(Resource)]
struct PipeSpawnTimer(Timer);

#[derive(Event, Default)]
pub struct FlapEvent;

#[derive(Event, Default)]
pub struct ResetEvent;

#[derive(Event, Default)]
pub struct GatePassed;

#[derive(Event, Default)]
pub struct BirdCrashed;

#[derive(Resource, Default, Deref, DerefMut)]
pub struct Score(pub u32);

#[derive(Component)]
pub struct Bird {
    pub vel: f32,
}

/// Root entity of a pipe pair; both pipes and the score gate are its
/// children, so one translation moves all three in lockstep.
#[derive(Component)]
pub struct PipePair;

#[derive(Component)]
pub struct Pipe {
    pub half: Vec2,
}

#[derive(Component)]
pub struct ScoreGate {
    pub half: Vec2,
}

const BIRD_COLOR: Color = Color::srgb(1.0, 0.84, 0.2);
const PIPE_COLOR: Color = Color::srgb(0.18, 0.72, 0.25);
const BIRD_Z: f32 = 10.0;
const PIPE_Z: f32 = -1.0;

#[derive(Resource, Clone)]
pub struct GameSettings {
    pub gravity: f32,
    pub flap_speed: f32,
    pub pipe_speed: f32,
    pub gap_height: f32,
    pub pipe_width: f32,
    pub gate_width: f32,
    pub bird_radius: f32,
    pub spawn_lead: f32,
    pub despawn_margin: f32,
    pub spacing: f32,
    pub kill_margin: f32,
    pub bounds: Vec2,
    pub running: bool,
    pub deterministic: bool,
    pub show_help: bool,
    pub show_diagnostics: bool,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            gravity: 2400.0,
            flap_speed: 760.0,
            pipe_speed: 200.0,
            gap_height: 250.0,
            pipe_width: 80.0,
            gate_width: 10.0,
            bird_radius: 24.0,
            spawn_lead: 10.0,
            despawn_margin: 300.0,
            spacing: 80.0,
            kill_margin: 80.0,
            bounds: Vec2::new(480.0, 800.0),
            running: true,
            deterministic: false,
            show_help: true,
            show_diagnostics: false,
        }
    }
}

impl GameSettings {
    /// Vertical offsets are drawn from ±band around screen center.
    pub fn offset_band(&self) -> f32 {
        self.bounds.y / 8.0
    }

    /// Horizontal distance between consecutive pair roots.
    pub fn spawn_spacing(&self) -> f32 {
        (self.bounds.x + self.spawn_lead + self.pipe_width + self.spacing) * 0.45
    }

    pub fn spawn_interval(&self) -> f32 {
        self.spawn_spacing() / self.pipe_speed
    }

    pub fn pipe_len(&self) -> f32 {
        self.bounds.y
    }

    pub fn spawn_x(&self) -> f32 {
        self.bounds.x * 0.5 + self.spawn_lead + self.pipe_width * 0.5
    }

    pub fn despawn_x(&self) -> f32 {
        -(self.bounds.x * 0.5 + self.despawn_margin + self.pipe_width * 0.5)
    }

    /// Invisible obstacle under the screen; falling out of view ends the run.
    pub fn kill_plane(&self) -> Aabb2d {
        let depth = 500.0;
        Aabb2d::new(
            Vec2::new(0.0, -(self.bounds.y * 0.5 + self.kill_margin + depth)),
            Vec2::new(self.bounds.x, depth),
        )
    }
}

pub struct GamePlugin;
impl Plugin for GamePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<GameSettings>()
            .init_resource::<Score>()
            .insert_resource(PipeSpawnTimer(Timer::from_seconds(
                GameSettings::default().spawn_interval(),
                TimerMode::Repeating,
            )))
            .add_event::<FlapEvent>()
            .add_event::<ResetEvent>()
            .add_event::<GatePassed>()
            .add_event::<BirdCrashed>()
            .add_systems(Startup, spawn_bird)
            .add_systems(Update, (handle_flap, handle_reset, track_window))
            .add_systems(Update, idle_bob.run_if(in_state(AppState::Ready)))
            .add_systems(OnEnter(AppState::Playing), arm_spawner)
            .add_systems(OnEnter(AppState::GameOver), log_game_over)
            .add_systems(
                Update,
                (
                    apply_gravity,
                    move_pipes,
                    spawn_pipes,
                    check_collisions,
                    update_score,
                    bird_crash,
                    despawn_offscreen,
                )
                    .chain()
                    .run_if(in_state(AppState::Playing)),
            );
    }
}

fn spawn_bird(mut commands: Commands, settings: Res<GameSettings>) {
    commands.spawn((
        Bird { vel: 0.0 },
        SpriteBundle {
            sprite: Sprite {
                color: BIRD_COLOR,
                custom_size: Some(Vec2::splat(settings.bird_radius * 2.0)),
                ..default()
            },
            transform: Transform::from_xyz(0.0, 0.0, BIRD_Z),
            ..default()
        },
    ));
}

fn gap_offset(rng: &mut dyn RngCore, band: f32) -> f32 {
    (rng.gen::<f32>() - 0.5) * 2.0 * band
}

fn spawn_pipe_pair(commands: &mut Commands, settings: &GameSettings, rng: &mut dyn RngCore) {
    let y_offset = gap_offset(rng, settings.offset_band());
    let pipe_half = Vec2::new(settings.pipe_width, settings.pipe_len()) * 0.5;
    let gate_half = Vec2::new(settings.gate_width, settings.gap_height) * 0.5;
    let gap_edge = settings.gap_height * 0.5 + pipe_half.y;

    commands
        .spawn((
            PipePair,
            SpatialBundle::from_transform(Transform::from_xyz(settings.spawn_x(), 0.0, PIPE_Z)),
        ))
        .with_children(|pair| {
            for dir in [1.0f32, -1.0] {
                pair.spawn((
                    Pipe { half: pipe_half },
                    SpriteBundle {
                        sprite: Sprite {
                            color: PIPE_COLOR,
                            custom_size: Some(pipe_half * 2.0),
                            ..default()
                        },
                        transform: Transform::from_xyz(0.0, y_offset + dir * gap_edge, 0.0),
                        ..default()
                    },
                ));
            }
            pair.spawn((
                ScoreGate { half: gate_half },
                SpatialBundle::from_transform(Transform::from_xyz(0.0, y_offset, 0.0)),
            ));
        });
    debug!("pipe pair spawned, gap offset {:.1}", y_offset);
}

fn arm_spawner(
    mut commands: Commands,
    settings: Res<GameSettings>,
    mut timer: ResMut<PipeSpawnTimer>,
    mut seeded: Option<ResMut<SeededRng>>,
) {
    timer
        .0
        .set_duration(Duration::from_secs_f32(settings.spawn_interval()));
    timer.0.reset();

    // The first pair appears the instant the run starts.
    let mut thread_rng = rand::thread_rng();
    let rng: &mut dyn RngCore = match seeded.as_mut() {
        Some(s) => &mut s.0,
        None => &mut thread_rng,
    };
    spawn_pipe_pair(&mut commands, &settings, rng);
}

fn spawn_pipes(
    mut commands: Commands,
    time: Res<Time>,
    settings: Res<GameSettings>,
    mut timer: ResMut<PipeSpawnTimer>,
    mut seeded: Option<ResMut<SeededRng>>,
) {
    if !settings.running {
        return;
    }
    let interval = Duration::from_secs_f32(settings.spawn_interval());
    if timer.0.duration() != interval {
        timer.0.set_duration(interval);
    }
    timer.0.tick(time.delta());
    if !timer.0.just_finished() {
        return;
    }

    let mut thread_rng = rand::thread_rng();
    let rng: &mut dyn RngCore = match seeded.as_mut() {
        Some(s) => &mut s.0,
        None => &mut thread_rng,
    };
    spawn_pipe_pair(&mut commands, &settings, rng);
}

fn handle_flap(
    mut ev_flap: EventReader<FlapEvent>,
    mut ev_reset: EventWriter<ResetEvent>,
    state: Res<State<AppState>>,
    mut next_state: ResMut<NextState<AppState>>,
    settings: Res<GameSettings>,
    mut bird_q: Query<&mut Bird>,
) {
    if ev_flap.is_empty() {
        return;
    }
    ev_flap.clear();

    match state.get() {
        AppState::GameOver => {
            ev_reset.send(ResetEvent);
        }
        AppState::Ready => {
            next_state.set(AppState::Playing);
            if let Ok(mut bird) = bird_q.get_single_mut() {
                bird.vel = settings.flap_speed;
            }
            info!("run started");
        }
        AppState::Playing => {
            // A flap replaces the current vertical velocity; it never stacks.
            if let Ok(mut bird) = bird_q.get_single_mut() {
                bird.vel = settings.flap_speed;
            }
        }
    }
}

fn apply_gravity(
    time: Res<Time>,
    settings: Res<GameSettings>,
    mut bird_q: Query<(&mut Bird, &mut Transform)>,
) {
    if !settings.running {
        return;
    }
    let dt = time.delta_seconds();
    for (mut bird, mut tf) in &mut bird_q {
        bird.vel -= settings.gravity * dt;
        tf.translation.y += bird.vel * dt;
    }
}

fn idle_bob(time: Res<Time>, mut bird_q: Query<&mut Transform, With<Bird>>) {
    for mut tf in &mut bird_q {
        tf.translation.y = (time.elapsed_seconds() * 3.0).sin() * 6.0;
    }
}

fn move_pipes(
    time: Res<Time>,
    settings: Res<GameSettings>,
    mut pairs: Query<&mut Transform, With<PipePair>>,
) {
    if !settings.running {
        return;
    }
    let dx = settings.pipe_speed * time.delta_seconds();
    for mut tf in &mut pairs {
        tf.translation.x -= dx;
    }
}

// Children are classified against the bird with world positions composed
// from the pair root, so a pair spawned this frame is already where it
// renders and not at the GlobalTransform identity.
fn check_collisions(
    mut commands: Commands,
    settings: Res<GameSettings>,
    bird_q: Query<&Transform, With<Bird>>,
    pairs: Query<&Transform, With<PipePair>>,
    gates: Query<(Entity, &Parent, &Transform, &ScoreGate)>,
    pipes: Query<(&Parent, &Transform, &Pipe)>,
    mut ev_scored: EventWriter<GatePassed>,
    mut ev_crashed: EventWriter<BirdCrashed>,
) {
    let Ok(bird_tf) = bird_q.get_single() else {
        return;
    };
    let bird = BoundingCircle::new(bird_tf.translation.truncate(), settings.bird_radius);

    for (entity, parent, tf, gate) in &gates {
        let Ok(root) = pairs.get(parent.get()) else {
            continue;
        };
        let center = (root.translation + tf.translation).truncate();
        if bird.intersects(&Aabb2d::new(center, gate.half)) {
            // Despawning the gate on first contact is what makes the
            // score increment idempotent.
            commands.entity(entity).despawn_recursive();
            ev_scored.send(GatePassed);
        }
    }

    for (parent, tf, pipe) in &pipes {
        let Ok(root) = pairs.get(parent.get()) else {
            continue;
        };
        let center = (root.translation + tf.translation).truncate();
        if bird.intersects(&Aabb2d::new(center, pipe.half)) {
            ev_crashed.send(BirdCrashed);
        }
    }

    if bird.intersects(&settings.kill_plane()) {
        ev_crashed.send(BirdCrashed);
    }
}

fn update_score(mut ev_scored: EventReader<GatePassed>, mut score: ResMut<Score>) {
    for _ in ev_scored.read() {
        score.0 += 1;
        debug!("gate passed, score {}", score.0);
    }
}

fn bird_crash(mut ev_crashed: EventReader<BirdCrashed>, mut next_state: ResMut<NextState<AppState>>) {
    if ev_crashed.read().next().is_some() {
        next_state.set(AppState::GameOver);
    }
}

fn log_game_over(score: Res<Score>) {
    info!("game over, final score {}", score.0);
}

fn despawn_offscreen(
    mut commands: Commands,
    settings: Res<GameSettings>,
    pairs: Query<(Entity, &Transform), With<PipePair>>,
) {
    for (entity, tf) in &pairs {
        if tf.translation.x < settings.despawn_x() {
            commands.entity(entity).despawn_recursive();
        }
    }
}

fn handle_reset(
    mut commands: Commands,
    mut ev_reset: EventReader<ResetEvent>,
    pairs: Query<Entity, With<PipePair>>,
    mut bird_q: Query<(&mut Bird, &mut Transform)>,
    mut score: ResMut<Score>,
    mut next_state: ResMut<NextState<AppState>>,
) {
    if ev_reset.is_empty() {
        return;
    }
    ev_reset.clear();

    for entity in &pairs {
        commands.entity(entity).despawn_recursive();
    }
    if let Ok((mut bird, mut tf)) = bird_q.get_single_mut() {
        bird.vel = 0.0;
        tf.translation = Vec3::new(0.0, 0.0, BIRD_Z);
    }
    score.0 = 0;
    next_state.set(AppState::Ready);
    info!("session reset");
}

fn track_window(windows: Query<&Window>, mut settings: ResMut<GameSettings>) {
    let Ok(win) = windows.get_single() else {
        return;
    };
    let size = Vec2::new(win.width(), win.height());
    if size != settings.bounds {
        settings.bounds = size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::state::app::StatesPlugin;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::thread::sleep;

    fn test_app() -> App {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, StatesPlugin));
        app.init_state::<AppState>();
        app.add_plugins(GamePlugin);
        app.insert_resource(SeededRng(StdRng::from_seed([7; 32])));
        app
    }

    fn current_state(app: &App) -> AppState {
        app.world().resource::<State<AppState>>().get().clone()
    }

    fn bird_entity(app: &mut App) -> Entity {
        app.world_mut()
            .query_filtered::<Entity, With<Bird>>()
            .single(app.world())
    }

    /// Startup, then one flap: two updates later the run is live and the
    /// first pair has spawned.
    fn start_run(app: &mut App) {
        app.update();
        app.world_mut().send_event(FlapEvent);
        app.update();
        app.update();
        assert_eq!(current_state(app), AppState::Playing);
    }

    /// World-space center of the first score gate and its entity.
    fn first_gate(app: &mut App) -> (Entity, Vec2) {
        let mut gates = app
            .world_mut()
            .query::<(Entity, &Parent, &Transform, &ScoreGate)>();
        let (entity, parent, tf, _) = gates.single(app.world());
        let parent = parent.get();
        let local = tf.translation;
        let root = app.world().get::<Transform>(parent).unwrap().translation;
        (entity, (root + local).truncate())
    }

    fn place_bird(app: &mut App, pos: Vec2) {
        let bird = bird_entity(app);
        app.world_mut().get_mut::<Transform>(bird).unwrap().translation =
            pos.extend(BIRD_Z);
    }

    /// Stops gravity, scrolling, and the spawn timer so a test can stage
    /// positions without the scene drifting under it. The collision
    /// classifier keeps running.
    fn pause_motion(app: &mut App) {
        app.world_mut().resource_mut::<GameSettings>().running = false;
    }

    #[test]
    fn gravity_waits_for_first_flap() {
        let mut app = test_app();
        app.update();
        for _ in 0..5 {
            sleep(Duration::from_millis(2));
            app.update();
        }
        let bird = bird_entity(&mut app);
        assert_eq!(current_state(&app), AppState::Ready);
        assert_eq!(app.world().get::<Bird>(bird).unwrap().vel, 0.0);

        app.world_mut().send_event(FlapEvent);
        app.update();
        let vel_after_flap = app.world().get::<Bird>(bird).unwrap().vel;
        assert_eq!(
            vel_after_flap,
            app.world().resource::<GameSettings>().flap_speed
        );

        app.update();
        for _ in 0..5 {
            sleep(Duration::from_millis(2));
            app.update();
        }
        assert!(app.world().get::<Bird>(bird).unwrap().vel < vel_after_flap);
    }

    #[test]
    fn score_increments_once_per_gate() {
        let mut app = test_app();
        start_run(&mut app);
        pause_motion(&mut app);

        let (gate, center) = first_gate(&mut app);
        place_bird(&mut app, center);
        app.update();

        assert_eq!(app.world().resource::<Score>().0, 1);
        assert!(app.world().get_entity(gate).is_none());

        // The gate is gone; sitting in the gap scores nothing further.
        for _ in 0..5 {
            app.update();
        }
        assert_eq!(app.world().resource::<Score>().0, 1);
        assert_eq!(current_state(&app), AppState::Playing);
    }

    #[test]
    fn no_score_after_game_over() {
        let mut app = test_app();
        start_run(&mut app);

        app.world_mut().send_event(BirdCrashed);
        app.update();
        app.update();
        assert_eq!(current_state(&app), AppState::GameOver);

        app.world_mut().send_event(GatePassed);
        app.update();
        app.update();
        assert_eq!(app.world().resource::<Score>().0, 0);
    }

    #[test]
    fn pipe_collision_ends_the_run() {
        let mut app = test_app();
        start_run(&mut app);
        pause_motion(&mut app);

        let (_, gate_center) = first_gate(&mut app);
        let settings = app.world().resource::<GameSettings>().clone();
        let pipe_center_y =
            gate_center.y + settings.gap_height * 0.5 + settings.pipe_len() * 0.5;
        place_bird(&mut app, Vec2::new(gate_center.x, pipe_center_y));
        app.update();
        app.update();
        assert_eq!(current_state(&app), AppState::GameOver);
    }

    #[test]
    fn simultaneous_contacts_transition_once() {
        let mut app = test_app();
        start_run(&mut app);

        app.world_mut().send_event(BirdCrashed);
        app.world_mut().send_event(BirdCrashed);
        app.update();
        app.update();
        assert_eq!(current_state(&app), AppState::GameOver);

        // Late contacts after the terminal state are inert.
        app.world_mut().send_event(BirdCrashed);
        app.update();
        assert_eq!(current_state(&app), AppState::GameOver);
    }

    #[test]
    fn pipes_freeze_after_game_over() {
        let mut app = test_app();
        start_run(&mut app);

        app.world_mut().send_event(BirdCrashed);
        app.update();
        app.update();
        assert_eq!(current_state(&app), AppState::GameOver);

        let pair_xs = |app: &mut App| -> Vec<f32> {
            let mut pairs = app
                .world_mut()
                .query_filtered::<&Transform, With<PipePair>>();
            let mut xs: Vec<f32> = pairs
                .iter(app.world())
                .map(|tf| tf.translation.x)
                .collect();
            xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
            xs
        };
        let before = pair_xs(&mut app);
        assert!(!before.is_empty());
        sleep(Duration::from_millis(5));
        app.update();
        assert_eq!(pair_xs(&mut app), before);
    }

    #[test]
    fn falling_off_screen_ends_the_run() {
        let mut app = test_app();
        start_run(&mut app);
        pause_motion(&mut app);

        let settings = app.world().resource::<GameSettings>().clone();
        place_bird(
            &mut app,
            Vec2::new(0.0, -(settings.bounds.y * 0.5 + settings.kill_margin + 10.0)),
        );
        app.update();
        app.update();
        assert_eq!(current_state(&app), AppState::GameOver);
    }

    #[test]
    fn restart_resets_session() {
        let mut app = test_app();
        start_run(&mut app);
        pause_motion(&mut app);

        let (_, center) = first_gate(&mut app);
        place_bird(&mut app, center);
        app.update();
        assert_eq!(app.world().resource::<Score>().0, 1);

        app.world_mut().send_event(BirdCrashed);
        app.update();
        app.update();
        assert_eq!(current_state(&app), AppState::GameOver);

        // A flap in the terminal state requests the reset.
        app.world_mut().send_event(FlapEvent);
        app.update();
        app.update();
        app.update();

        assert_eq!(current_state(&app), AppState::Ready);
        assert_eq!(app.world().resource::<Score>().0, 0);
        let mut pairs = app
            .world_mut()
            .query_filtered::<Entity, With<PipePair>>();
        assert_eq!(pairs.iter(app.world()).count(), 0);
        let bird = bird_entity(&mut app);
        assert_eq!(
            app.world()
                .get::<Transform>(bird)
                .unwrap()
                .translation
                .x,
            0.0
        );
        assert_eq!(app.world().get::<Bird>(bird).unwrap().vel, 0.0);
    }

    #[test]
    fn spawn_cadence_fixes_the_horizontal_gap() {
        let settings = GameSettings::default();
        let spacing = settings.spawn_interval() * settings.pipe_speed;
        assert!((spacing - settings.spawn_spacing()).abs() < 1e-3);

        // Faster pipes spawn sooner; the distance between pairs is unchanged.
        let mut fast = settings.clone();
        fast.pipe_speed *= 2.0;
        assert!(fast.spawn_interval() < settings.spawn_interval());
        assert!((fast.spawn_interval() * fast.pipe_speed - fast.spawn_spacing()).abs() < 1e-3);
        assert!((fast.spawn_spacing() - settings.spawn_spacing()).abs() < 1e-3);
    }

    #[test]
    fn gap_offsets_stay_in_band() {
        let settings = GameSettings::default();
        let band = settings.offset_band();
        let mut rng = StdRng::from_seed([3; 32]);
        for _ in 0..200 {
            let off = gap_offset(&mut rng, band);
            assert!(off.abs() <= band, "offset {off} outside ±{band}");
        }
    }

    #[test]
    fn seeded_offsets_replay_identically() {
        let band = GameSettings::default().offset_band();
        let mut a = StdRng::from_seed([9; 32]);
        let mut b = StdRng::from_seed([9; 32]);
        for _ in 0..32 {
            assert_eq!(gap_offset(&mut a, band), gap_offset(&mut b, band));
        }
    }

    #[test]
    fn pipes_and_gate_share_the_gap_offset() {
        let mut app = test_app();
        start_run(&mut app);
        pause_motion(&mut app);

        let settings = app.world().resource::<GameSettings>().clone();
        let (_, gate_center) = first_gate(&mut app);
        let gap_edge = settings.gap_height * 0.5 + settings.pipe_len() * 0.5;

        let mut pipes = app.world_mut().query::<(&Transform, &Pipe)>();
        let mut ys: Vec<f32> = pipes
            .iter(app.world())
            .map(|(tf, _)| tf.translation.y)
            .collect();
        ys.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(ys.len(), 2);

        let mut gates = app.world_mut().query::<(&Transform, &ScoreGate)>();
        let (gate_tf, _) = gates.single(app.world());
        assert!((ys[0] - (gate_tf.translation.y - gap_edge)).abs() < 1e-3);
        assert!((ys[1] - (gate_tf.translation.y + gap_edge)).abs() < 1e-3);
        assert!(gate_center.y.abs() <= settings.offset_band() + 1e-3);
    }
}
