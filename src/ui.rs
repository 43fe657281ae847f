use bevy::diagnostic::{DiagnosticsStore, EntityCountDiagnosticsPlugin, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy_egui::{
    egui::{self, Align2, Color32, FontId, RichText},
    EguiContexts, EguiPlugin,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::game::{AppState, GameSettings, ResetEvent, Score, SeededRng};

pub struct UiPlugin;
impl Plugin for UiPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(EguiPlugin)
            .init_resource::<ScorePulse>()
            .add_systems(Update, (score_hud, tuning_ui))
            .add_systems(Update, game_over_ui.run_if(in_state(AppState::GameOver)));
    }
}

/// Feedback animation on the center score readout: scales to 1.2x and
/// eases back over 0.2s, mirroring the point just scored.
#[derive(Resource)]
pub struct ScorePulse {
    timer: Timer,
}

impl Default for ScorePulse {
    fn default() -> Self {
        let mut timer = Timer::from_seconds(0.2, TimerMode::Once);
        timer.tick(timer.duration());
        Self { timer }
    }
}

impl ScorePulse {
    fn scale(&self) -> f32 {
        if self.timer.finished() {
            return 1.0;
        }
        let f = self.timer.fraction();
        1.0 + 0.4 * (0.5 - (f - 0.5).abs())
    }
}

fn score_hud(
    mut contexts: EguiContexts,
    score: Res<Score>,
    time: Res<Time>,
    mut pulse: ResMut<ScorePulse>,
    mut last_score: Local<u32>,
) {
    pulse.timer.tick(time.delta());
    if score.0 > *last_score {
        pulse.timer.reset();
    }
    *last_score = score.0;

    let ctx = contexts.ctx_mut();

    // Corner scoreboard: white rounded panel, top-left.
    egui::Area::new("scoreboard".into())
        .anchor(Align2::LEFT_TOP, egui::Vec2::new(20.0, 20.0))
        .show(ctx, |ui| {
            egui::Frame::none()
                .fill(Color32::WHITE)
                .stroke(egui::Stroke::new(2.0, Color32::BLACK))
                .rounding(egui::Rounding::same(12.0))
                .inner_margin(egui::Margin::symmetric(28.0, 10.0))
                .show(ui, |ui| {
                    ui.label(
                        RichText::new(format!("{}", score.0))
                            .font(FontId::proportional(36.0))
                            .color(Color32::BLACK),
                    );
                });
        });

    egui::Area::new("center_score".into())
        .anchor(Align2::CENTER_TOP, egui::Vec2::new(0.0, 60.0))
        .show(ctx, |ui| {
            ui.label(
                RichText::new(format!("{}", score.0))
                    .font(FontId::proportional(72.0 * pulse.scale()))
                    .color(Color32::BLACK),
            );
        });
}

fn tuning_ui(
    mut commands: Commands,
    mut contexts: EguiContexts,
    mut settings: ResMut<GameSettings>,
    score: Res<Score>,
    state: Res<State<AppState>>,
    diagnostics: Res<DiagnosticsStore>,
) {
    egui::Window::new("Settings")
        .default_open(false)
        .show(contexts.ctx_mut(), |ui| {
            ui.label(format!("State: {:?}", state.get()));
            ui.label(format!("Score: {}", score.0));
            if let Some(fps) = diagnostics.get(&FrameTimeDiagnosticsPlugin::FPS) {
                if let Some(value) = fps.smoothed() {
                    ui.label(format!("FPS: {:.1}", value));
                }
            }

            ui.separator();

            ui.checkbox(&mut settings.running, "Running");
            ui.add(egui::Slider::new(&mut settings.gravity, 500.0..=5000.0).text("Gravity"));
            ui.add(
                egui::Slider::new(&mut settings.flap_speed, 200.0..=1500.0).text("Flap impulse"),
            );
            ui.add(egui::Slider::new(&mut settings.pipe_speed, 50.0..=600.0).text("Pipe speed"));
            ui.add(egui::Slider::new(&mut settings.gap_height, 120.0..=400.0).text("Gap height"));
            ui.add(egui::Slider::new(&mut settings.spacing, 0.0..=300.0).text("Pipe spacing"));

            ui.separator();

            if ui
                .checkbox(&mut settings.deterministic, "Deterministic")
                .changed()
            {
                if settings.deterministic {
                    commands.insert_resource(SeededRng(StdRng::from_seed([0; 32])));
                } else {
                    commands.remove_resource::<SeededRng>();
                }
            }
        });

    if settings.show_help {
        egui::Window::new("Help").show(contexts.ctx_mut(), |ui| {
            ui.label("Click / Space / Up: Flap");
            ui.label("P: Pause");
            ui.label("R: Restart");
            ui.label("H: Toggle Help");
            ui.label("F3: Toggle Diagnostics");
        });
    }

    if settings.show_diagnostics {
        egui::Window::new("Diagnostics").show(contexts.ctx_mut(), |ui| {
            if let Some(fps) = diagnostics.get(&FrameTimeDiagnosticsPlugin::FPS) {
                if let Some(value) = fps.smoothed() {
                    ui.label(format!("FPS: {:.1}", value));
                }
            }
            if let Some(entity_count) =
                diagnostics.get(&EntityCountDiagnosticsPlugin::ENTITY_COUNT)
            {
                if let Some(value) = entity_count.value() {
                    ui.label(format!("Entities: {}", value));
                }
            }
        });
    }
}

fn game_over_ui(
    mut contexts: EguiContexts,
    score: Res<Score>,
    mut ev_reset: EventWriter<ResetEvent>,
) {
    egui::Window::new("Game Over")
        .anchor(Align2::CENTER_CENTER, egui::Vec2::ZERO)
        .collapsible(false)
        .resizable(false)
        .show(contexts.ctx_mut(), |ui| {
            ui.label(
                RichText::new("Game Over!")
                    .font(FontId::proportional(32.0))
                    .color(Color32::BLACK),
            );
            ui.label(format!("Score: {}", score.0));
            ui.label("Tap to restart");
            if ui.button("Retry").clicked() {
                ev_reset.send(ResetEvent);
            }
        });
}
