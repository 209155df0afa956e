use color_delivery_core::{
    Action, Color, EnvConfig, Environment, ObjectState, Position, RewardMode,
    layout::Layout,
    render::{Renderer, render},
};

fn world(map: &str, colors: Vec<Color>, max_steps: usize, mode: RewardMode) -> Environment {
    let layout: Layout = map.parse().unwrap();
    let config = EnvConfig::new(layout.size, colors, max_steps, mode);
    Environment::with_layout(config, &layout).unwrap()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn deliver_single_red_object() {
    let mut env = world("@r .\n. R", vec![Color::Red], 6, RewardMode::Correct);

    let pick = env.step(Action::Pick);
    assert_close(pick.reward, -0.1);
    assert!(!pick.done);
    assert_eq!(env.holding().map(|o| o.color), Some(Color::Red));
    assert_eq!(env.objects()[0].position(), None);

    env.step(Action::Right);
    env.step(Action::Down);
    assert_eq!(env.agent(), Position::new(1, 1));

    let drop = env.step(Action::Drop);
    assert_close(drop.reward, 9.9);
    assert!(drop.done);
    assert!(env.objects()[0].is_delivered());
    assert!(env.holding().is_none());
    assert!(env.all_delivered());
    assert!(!env.is_truncated());

    // Nothing left to pick up.
    let again = env.step(Action::Pick);
    assert_close(again.reward, -0.1);
    assert!(env.holding().is_none());
    assert!(env.objects()[0].is_delivered());
}

#[test]
fn wrong_bin_costs_and_leaves_object_on_the_bin_cell() {
    let mut env = world(
        "@r B\nb R",
        vec![Color::Red, Color::Blue],
        10,
        RewardMode::Correct,
    );
    env.step(Action::Pick);
    env.step(Action::Right);

    let drop = env.step(Action::Drop);
    assert_close(drop.reward, -5.1);
    assert!(!drop.done);
    assert!(env.holding().is_none());
    let red = &env.objects()[0];
    assert!(!red.is_delivered());
    assert_eq!(red.state(), ObjectState::OnGrid(Position::new(0, 1)));

    // The rejected object can be picked up again from there.
    env.step(Action::Pick);
    assert!(env.objects()[0].is_held());
}

#[test]
fn first_bin_on_a_shared_cell_decides() {
    let mut env = world(
        "@rBR .\nb .",
        vec![Color::Red, Color::Blue],
        10,
        RewardMode::Correct,
    );
    env.step(Action::Pick);
    // The red bin is listed first, so the red object is delivered.
    assert_close(env.step(Action::Drop).reward, 9.9);

    let mut env = world(
        "@rBR .\nb .",
        vec![Color::Blue, Color::Red],
        10,
        RewardMode::Correct,
    );
    env.step(Action::Pick);
    // Now the blue bin comes first and rejects the red object.
    assert_close(env.step(Action::Drop).reward, -5.1);
}

/// `any_delivery` pays for a bin drop without delivering. The object is left
/// neither held, on the grid, nor delivered; this pins that behavior.
#[test]
fn any_delivery_strands_the_object() {
    let mut env = world("@r R\n. .", vec![Color::Red], 8, RewardMode::AnyDelivery);
    env.step(Action::Pick);
    env.step(Action::Right);

    let drop = env.step(Action::Drop);
    assert_close(drop.reward, 4.9);
    assert!(!drop.done);
    assert!(env.holding().is_none());
    let object = &env.objects()[0];
    assert_eq!(object.state(), ObjectState::Vanished);
    assert_eq!(object.position(), None);
    assert!(!object.is_delivered());
    assert!(!object.is_held());

    // Never pickable again, wherever the agent stands.
    for action in [Action::Pick, Action::Left, Action::Pick] {
        env.step(action);
        assert!(env.holding().is_none());
    }
    assert!(env.object_at(Position::new(0, 0)).is_none());
    assert!(env.object_at(Position::new(0, 1)).is_none());

    // Never drawn: the red bin cell shows only its background.
    let img = render(&env);
    assert_eq!(*img.get_pixel(96, 50), image::Rgb([255, 180, 180]));

    // Only truncation can end the episode now.
    let last = env.step(Action::Stay);
    assert_eq!(env.steps(), 7);
    assert!(!last.done);
    let last = env.step(Action::Stay);
    assert!(last.done);
    assert!(!env.all_delivered());
    assert!(env.is_truncated());
}

#[test]
fn any_delivery_ignores_bin_color() {
    let mut env = world(
        "@r B\nb R",
        vec![Color::Red, Color::Blue],
        8,
        RewardMode::AnyDelivery,
    );
    env.step(Action::Pick);
    env.step(Action::Right);
    assert_close(env.step(Action::Drop).reward, 4.9);
    assert_eq!(env.objects()[0].state(), ObjectState::Vanished);
}

#[test]
fn step_alive_pays_every_step() {
    let mut env = world("@r .\n. R", vec![Color::Red], 20, RewardMode::StepAlive);
    let actions = [
        Action::Up,
        Action::Pick,
        Action::Pick,
        Action::Right,
        Action::Down,
        Action::Drop,
        Action::Stay,
        Action::Drop,
    ];
    for action in actions {
        let step = env.step(action);
        assert_close(step.reward, 0.9);
    }
    // The bin drop had no bin rule in this mode: the object lies on the bin cell.
    assert_eq!(
        env.objects()[0].state(),
        ObjectState::OnGrid(Position::new(1, 1))
    );
}

#[test]
fn done_on_delivery_before_the_budget() {
    let mut env = world("@rR .\n. .", vec![Color::Red], 100, RewardMode::Correct);
    assert!(!env.step(Action::Pick).done);
    assert!(env.step(Action::Drop).done);
    assert_eq!(env.steps(), 2);
}

#[test]
fn done_on_truncation_without_delivery() {
    let mut env = world("@r .\n. R", vec![Color::Red], 3, RewardMode::Correct);
    assert!(!env.step(Action::Left).done);
    assert!(!env.step(Action::Up).done);
    let last = env.step(Action::Right);
    assert!(last.done);
    assert!(env.is_truncated());
    assert!(!env.all_delivered());
}

#[test]
fn done_stays_set_when_stepping_past_the_end() {
    let mut env = world("@r .\n. R", vec![Color::Red], 1, RewardMode::Correct);
    assert!(env.step(Action::Down).done);
    assert!(env.step(Action::Down).done);
    assert_eq!(env.steps(), 2);
}

#[test]
fn seeded_environments_replay_identically() {
    let config = EnvConfig::new(
        5,
        vec![Color::Red, Color::Green, Color::Blue],
        30,
        RewardMode::Correct,
    );
    let mut a = Environment::with_seed(config.clone(), 99).unwrap();
    let mut b = Environment::with_seed(config, 99).unwrap();
    let renderer = Renderer::new(16, 1).unwrap();
    let actions = [
        Action::Pick,
        Action::Down,
        Action::Right,
        Action::Pick,
        Action::Drop,
        Action::Left,
        Action::Up,
    ];
    for action in actions {
        assert_eq!(a.step(action), b.step(action));
        assert_eq!(renderer.render(&a), renderer.render(&b));
    }
    a.reset();
    b.reset();
    assert_eq!(a.agent(), b.agent());
    assert_eq!(a.bins(), b.bins());
}
