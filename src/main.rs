mod game;
mod input;
mod ui;

use bevy::diagnostic::{EntityCountDiagnosticsPlugin, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use game::{AppState, GamePlugin};
use input::InputPlugin;
use ui::UiPlugin;

fn main() {
    App::new()
        .insert_resource(ClearColor(Color::srgb(0.42, 0.80, 0.94)))
        .insert_resource(Msaa::Sample4)
        .init_state::<AppState>()
        .add_plugins(FrameTimeDiagnosticsPlugin)
        .add_plugins(EntityCountDiagnosticsPlugin)
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "flappy-rs — tap to flap".into(),
                resolution: (480., 800.).into(),
                resizable: false,
                ..default()
            }),
            ..default()
        }))
        .add_plugins((GamePlugin, UiPlugin, InputPlugin))
        .add_systems(Startup, setup_camera)
        .run();
}

fn setup_camera(mut commands: Commands) {
    commands.spawn((Camera2dBundle::default(), MainCamera));
}

#[derive(Component)]
pub struct MainCamera;
