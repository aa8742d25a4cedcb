//! Headless split/merge diagnostic: launch a stream of particles to a target
//! seed, watch it become its own instance, then merge everything back.
//!
//! Run with: cargo run --example split_merge

use glam::Vec3;
use slime3d::{SlimeParams, SlimeSimulation3D};

fn main() {
    let mut sim = SlimeSimulation3D::new(SlimeParams::default()).unwrap();
    sim.spawn_half_cube(10, 0.5);
    sim.set_anchor(Vec3::new(0.0, 1.5, 0.0), Vec3::ZERO);

    for _ in 0..20 {
        sim.update();
    }
    println!(
        "settled: {} regions, {} instances",
        sim.region_count(),
        sim.active_instances().len()
    );

    // Shoot 40 particles at a far target guided by a seed controller.
    let target = Vec3::new(8.0, 1.0, 8.0);
    let launched = sim.nearest_particles(target, 40);
    sim.apply_velocity(&launched, Vec3::new(4.0, 8.0, 4.0));
    let seed = sim.create_controller_at(target, 2.0, None);
    sim.set_particle_controller(&launched, seed);

    for tick in 0..400 {
        sim.update();
        if tick % 50 == 0 {
            println!(
                "tick {:4}: regions {}, instances {}, at target {}",
                tick,
                sim.region_count(),
                sim.active_instances().len(),
                sim.count_particles_in_sphere(target, 2.5),
            );
        }
    }

    for info in sim.active_instances() {
        println!(
            "instance {}: pos ({:.1}, {:.1}, {:.1}), radius {:.1}, {} particles",
            info.id,
            info.position.x,
            info.position.y,
            info.position.z,
            info.radius,
            info.particle_count
        );
    }

    println!("requesting merge");
    sim.merge_all();
    for tick in 0..1200 {
        sim.update();
        if sim.region_count() == 1 {
            println!("merged after {} ticks", tick);
            break;
        }
    }
    println!(
        "final: {} regions, {} instances",
        sim.region_count(),
        sim.active_instances().len()
    );
}
