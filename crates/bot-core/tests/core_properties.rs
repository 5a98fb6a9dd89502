use std::sync::Arc;

use bot_core::{
    blocks, sets, ActorOps, BlockId, BlockLookup, BlockSet, Controller, PathFinder, PathGoal,
    SimRig,
    SimWorld, WorldSnapshot, WorldView,
};
use contracts::{BotConfig, JournalEntryKind, Pos, StrategyRequest, TorchSide};
use proptest::prelude::*;

fn run_ticks(controller: &mut Controller, rig: &mut SimRig, ticks: u32) {
    for _ in 0..ticks {
        rig.begin_tick();
        let snapshot = Arc::new(rig.world().snapshot());
        controller.on_game_tick(&snapshot, rig);
        rig.apply_tick();
    }
}

#[test]
fn property_flat_plane_walk_completes_in_one_tick_per_step() {
    let world = SimWorld::flat_plane(10, Pos::new(0, 1, 0));
    let mut rig = SimRig::new(world);
    let mut controller = Controller::new(BotConfig::default());
    controller.request_strategy(StrategyRequest::MoveTo {
        target: Pos::new(3, 1, 4),
    });

    // Seven orthogonal steps plus activation and completion overhead.
    run_ticks(&mut controller, &mut rig, 10);
    assert_eq!(rig.position(), Pos::new(3, 1, 4));
    let kinds: Vec<JournalEntryKind> = controller
        .journal()
        .iter()
        .map(|entry| entry.kind)
        .collect();
    assert!(kinds.contains(&JournalEntryKind::StrategyActivated));
    assert!(kinds.contains(&JournalEntryKind::StrategyFinished));
}

#[test]
fn property_torch_interrupter_suspends_and_resumes_the_tunnel() {
    let mut world = SimWorld::solid_box(Pos::new(0, 0, 0), Pos::new(13, 3, 2), Pos::new(1, 1, 1));
    // Starting pocket the agent stands in.
    world.set_block(Pos::new(1, 1, 1), blocks::AIR);
    world.set_block(Pos::new(1, 2, 1), blocks::AIR);
    let mut rig = SimRig::new(world);
    rig.give(blocks::TORCH, 16);

    let config = BotConfig::default();
    let mut controller = Controller::new(config.clone());
    controller.register_interrupter(Box::new(bot_core::PlaceTorchStrategy::new(&config)));
    controller.request_strategy(StrategyRequest::Tunnel {
        origin: Pos::new(2, 1, 1),
        dx: 1,
        dz: 0,
        length: 9,
        torches: TorchSide::None,
    });

    run_ticks(&mut controller, &mut rig, 600);

    for x in 2..=10 {
        assert_eq!(
            rig.world().block_at(Pos::new(x, 1, 1)),
            blocks::AIR,
            "section feet at x={x} should be dug"
        );
        assert_eq!(rig.world().block_at(Pos::new(x, 2, 1)), blocks::AIR);
    }
    let kinds: Vec<JournalEntryKind> = controller
        .journal()
        .iter()
        .map(|entry| entry.kind)
        .collect();
    assert!(kinds.contains(&JournalEntryKind::StrategySuspended));
    assert!(kinds.contains(&JournalEntryKind::StrategyResumed));
    assert!(kinds.contains(&JournalEntryKind::StrategyFinished));
    // The interrupter actually lit the tunnel.
    let torches_placed = (0..=13)
        .filter(|x| rig.world().block_at(Pos::new(*x, 1, 1)) == blocks::TORCH)
        .count();
    assert!(torches_placed >= 1);
}

#[test]
fn property_lit_tunnel_keeps_light_above_threshold_behind_the_face() {
    let mut world = SimWorld::solid_box(Pos::new(0, 0, 0), Pos::new(13, 3, 2), Pos::new(1, 1, 1));
    world.set_block(Pos::new(1, 1, 1), blocks::AIR);
    world.set_block(Pos::new(1, 2, 1), blocks::AIR);
    let mut rig = SimRig::new(world);
    rig.give(blocks::TORCH, 16);

    let mut config = BotConfig::default();
    config.torch_spacing = 4;
    let mut controller = Controller::new(config);
    controller.request_strategy(StrategyRequest::Tunnel {
        origin: Pos::new(2, 1, 1),
        dx: 1,
        dz: 0,
        length: 9,
        torches: TorchSide::Floor,
    });

    run_ticks(&mut controller, &mut rig, 600);

    let snapshot = rig.world().snapshot();
    let torches: Vec<i32> = (2..=10)
        .filter(|x| snapshot.block_at(Pos::new(*x, 1, 1)) == blocks::TORCH)
        .collect();
    assert!(!torches.is_empty(), "floor torches were placed");
    // Spot checks near a placed torch.
    let x = torches[0];
    assert!(snapshot.light_level_at(Pos::new(x, 1, 1)) >= 13);
}

proptest! {
    #[test]
    fn property_block_set_algebra_holds(
        a_ids in proptest::collection::vec(0_u16..256, 0..24),
        b_ids in proptest::collection::vec(0_u16..256, 0..24),
    ) {
        let a = BlockSet::of(&a_ids.iter().copied().map(BlockId).collect::<Vec<_>>());
        let b = BlockSet::of(&b_ids.iter().copied().map(BlockId).collect::<Vec<_>>());

        prop_assert_eq!(a.union(&b), b.union(&a));
        prop_assert_eq!(a.intersect(&b), b.intersect(&a));
        prop_assert_eq!(a.invert().invert(), a);
        prop_assert_eq!(a.union(&b).invert(), a.invert().intersect(&b.invert()));
        prop_assert_eq!(a.minus(&b).intersect(&b), BlockSet::EMPTY);
    }

    #[test]
    fn property_open_plane_paths_are_manhattan_shortest(
        x in 0_i32..8,
        z in 0_i32..8,
    ) {
        let world = WorldView::new(Arc::new(SimWorld::flat_plane(9, Pos::new(0, 1, 0)).snapshot()));
        let finder = PathFinder::new(150, 10_000, 40);
        let target = Pos::new(x, 1, z);
        let found = finder.find_path_to(&world, target).expect("open plane");
        prop_assert_eq!(found.distance, Pos::new(0, 1, 0).manhattan_distance(target));
        prop_assert_eq!(found.tasks.len() as u32, found.distance);
    }

    #[test]
    fn property_search_is_deterministic(
        x in 1_i32..8,
        z in 1_i32..8,
    ) {
        struct Spot { target: Pos }
        impl PathGoal for Spot {
            fn rate_destination(&self, _world: &WorldView, _distance: u32, pos: Pos) -> i64 {
                if pos == self.target { 1 } else { -1 }
            }
            fn add_tasks_for_target(
                &mut self,
                _world: &WorldView,
                _target: Pos,
                _tasks: &mut Vec<bot_core::Task>,
            ) {
            }
        }

        let snapshot = Arc::new(SimWorld::flat_plane(9, Pos::new(0, 1, 0)).snapshot());
        let finder = PathFinder::new(150, 10_000, 40);
        let target = Pos::new(x, 1, z);

        let first = finder
            .find_best(&WorldView::new(Arc::clone(&snapshot)), &mut Spot { target }, bot_core::SearchMode::Normal)
            .expect("found");
        let second = finder
            .find_best(&WorldView::new(snapshot), &mut Spot { target }, bot_core::SearchMode::Normal)
            .expect("found");
        prop_assert_eq!(first.target, second.target);
        prop_assert_eq!(first.distance, second.distance);
        prop_assert_eq!(first.tasks, second.tasks);
    }
}

#[test]
fn snapshot_taken_before_a_dig_never_changes() {
    let mut world = SimWorld::flat_plane(4, Pos::new(0, 1, 0));
    world.set_block(Pos::new(1, 1, 0), blocks::DIRT);
    let mut rig = SimRig::new(world);
    let before: WorldSnapshot = rig.world().snapshot();

    rig.begin_tick();
    rig.request_break(Pos::new(1, 1, 0));
    rig.apply_tick();

    assert_eq!(before.block_at(Pos::new(1, 1, 0)), blocks::DIRT);
    assert_eq!(rig.world().block_at(Pos::new(1, 1, 0)), blocks::AIR);
}

#[test]
fn safe_ground_never_contains_hazards() {
    assert!(!sets::SAFE_GROUND.contains(blocks::LAVA));
    assert!(!sets::SAFE_GROUND.contains(blocks::FIRE));
    assert!(sets::SAFE_GROUND.contains(blocks::STONE));
}
