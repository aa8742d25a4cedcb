//! Gameplay control surface: seeded controllers, particle reassignment,
//! launched-material accumulation, merging and instance switching.

use glam::Vec3;
use slime3d::{SlimeParams, SlimeSimulation3D};

fn spawn_cube_at(sim: &mut SlimeSimulation3D, offset: Vec3, width: usize, spacing: f32) {
    let half = width as f32 / 2.0;
    for i in 0..width {
        for j in 0..width {
            for k in 0..width {
                sim.spawn_particle(
                    offset + Vec3::new(k as f32 - half, j as f32, i as f32 - half) * spacing,
                );
            }
        }
    }
}

#[test]
fn assigned_particles_report_their_controller() {
    let mut sim = SlimeSimulation3D::new(SlimeParams::default()).unwrap();
    spawn_cube_at(&mut sim, Vec3::ZERO, 6, 0.5);
    sim.update();

    let target = sim.particles()[5].position + Vec3::new(1.0, 0.0, 0.0);
    let id = sim.create_controller_at(target, 2.0, None);
    sim.set_particle_controller(&[5], id);

    assert_eq!(sim.particles()[5].component, id as i32);
    assert!(sim.count_particles_in_sphere(target, 2.0) >= 1);
    assert!(sim.particles_in_controller(id, None).contains(&5));
}

#[test]
fn nearest_query_orders_by_distance() {
    let mut sim = SlimeSimulation3D::new(SlimeParams::default()).unwrap();
    spawn_cube_at(&mut sim, Vec3::ZERO, 4, 0.5);

    let probe = Vec3::new(10.0, 0.0, 0.0);
    let nearest = sim.nearest_particles(probe, 5);
    assert_eq!(nearest.len(), 5);
    let d = |i: usize| (sim.particles()[i].position - probe).length();
    for pair in nearest.windows(2) {
        assert!(d(pair[0]) <= d(pair[1]) + 1e-6);
    }
}

#[test]
fn launched_particles_accumulate_at_the_seed() {
    let mut sim = SlimeSimulation3D::new(SlimeParams::default()).unwrap();
    spawn_cube_at(&mut sim, Vec3::ZERO, 8, 0.5);
    for _ in 0..5 {
        sim.update();
    }

    let target = Vec3::new(5.0, 0.0, 5.0);
    let launched = sim.nearest_particles(target, 20);
    sim.apply_velocity(&launched, Vec3::new(0.0, 10.0, 5.0));
    let seed = sim.create_controller_at(target, 2.0, None);
    sim.set_particle_controller(&launched, seed);
    for &i in &launched {
        assert_eq!(sim.particles()[i].component, seed as i32);
    }

    let initial = sim.count_particles_in_sphere(target, 2.0);
    let mut counts = vec![initial];
    for _ in 0..8 {
        for _ in 0..50 {
            sim.update();
        }
        counts.push(sim.count_particles_in_sphere(target, 2.0));
    }

    let final_count = *counts.last().unwrap();
    assert!(
        final_count >= initial,
        "sphere count decayed: {:?}",
        counts
    );
    assert!(
        final_count >= 10,
        "launched particles never gathered at the seed: {:?}",
        counts
    );
}

#[test]
fn merge_pulls_split_blobs_back_together() {
    let mut sim = SlimeSimulation3D::new(SlimeParams::default()).unwrap();
    spawn_cube_at(&mut sim, Vec3::ZERO, 4, 0.5);
    spawn_cube_at(&mut sim, Vec3::new(10.0, 0.0, 0.0), 4, 0.5);
    sim.set_anchor(Vec3::new(0.0, 1.5, 0.0), Vec3::ZERO);

    for _ in 0..5 {
        sim.update();
    }
    assert!(sim.region_count() >= 2);

    sim.merge_all();
    let mut merged = false;
    for _ in 0..1500 {
        sim.update();
        if sim.region_count() == 1 {
            merged = true;
            break;
        }
    }
    assert!(merged, "blobs never merged, {} regions left", sim.region_count());
    assert_eq!(sim.active_instances().len(), 1);
}

#[test]
fn switching_control_between_instances() {
    let mut sim = SlimeSimulation3D::new(SlimeParams::default()).unwrap();
    spawn_cube_at(&mut sim, Vec3::ZERO, 4, 0.5);
    spawn_cube_at(&mut sim, Vec3::new(12.0, 0.0, 0.0), 4, 0.5);
    for _ in 0..5 {
        sim.update();
    }

    let instances = sim.active_instances();
    assert!(instances.len() >= 2);
    let other = instances
        .iter()
        .find(|i| i.id != sim.controlled_instance())
        .unwrap()
        .id;
    assert!(sim.switch_to_instance(other));
    assert_eq!(sim.controlled_instance(), other);

    // Unknown ids leave control untouched.
    assert!(!sim.switch_to_instance(999));
    assert_eq!(sim.controlled_instance(), other);
}
