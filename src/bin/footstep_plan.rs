// Footstep sequence planning sample
//
// Plans a fixed-length footstep sequence toward a target pose with a
// synthetic reachability classifier (disk of radius 0.5 around the
// previous stance) and animates the stance polygons with gnuplot.

use std::sync::Arc;

use gnuplot::*;
use nalgebra::{DMatrix, DVector};

use reachmap_planning::grid::GridSet;
use reachmap_planning::planning::{FootstepConfig, FootstepPlanner};
use reachmap_planning::sampling::planar_pose;
use reachmap_planning::{SamplingSpace, SvmModel};

fn disk_svm() -> Arc<SvmModel> {
    let space = SamplingSpace::SE2;
    let mut sv_mat = DMatrix::zeros(4, 1);
    sv_mat.set_column(0, &space.sample_to_input(&space.identity_sample()));
    Arc::new(SvmModel::new(space, sv_mat, DVector::from_element(1, 1.0), 1.0, 0.0).unwrap())
}

fn main() {
    let svm = disk_svm();
    let mut config = FootstepConfig::default();
    config.footstep_num = 5;
    config.alternate_lr = true;
    config.initial_sample_pose = planar_pose(0.2, -0.1, 0.0);
    // decision value at relative distance 0.5 with aligned yaw
    config.planning.svm_thre = (-0.25f64).exp();
    config.planning.delta_config_limit = 0.04;

    let sample_min = DVector::from_vec(vec![-1.0, -1.0, -std::f64::consts::PI]);
    let sample_max = DVector::from_vec(vec![1.0, 1.0, std::f64::consts::PI]);
    let grid = GridSet::from_svm(&svm, vec![40, 40, 9], sample_min, sample_max).unwrap();

    let mut planner = FootstepPlanner::new(config, svm, Some(grid)).unwrap();
    let target = planar_pose(1.8, 0.4, 0.0);
    planner.set_target_pose(&target);

    let mut fg = Figure::new();
    planner.run_loop(400, |planner| {
        fg.clear_axes();
        let axes = fg.axes2d();
        axes.set_x_range(Fix(-0.5), Fix(2.5))
            .set_y_range(Fix(-1.0), Fix(1.0))
            .set_aspect_ratio(Fix(1.0))
            .points(
                Some(target.translation.x),
                Some(target.translation.y),
                &[PointSymbol('O'), Color("red"), PointSize(3.0)],
            );
        if let Some(footprint) = planner.reachable_footprint(planner.current_sample_seq().len() - 1)
        {
            let fx: Vec<f64> = footprint.iter().map(|p| p.x).collect();
            let fy: Vec<f64> = footprint.iter().map(|p| p.y).collect();
            axes.points(&fx, &fy, &[PointSymbol('S'), Color("gray"), PointSize(0.5)]);
        }
        for (i, polygon) in planner.foot_polygons().iter().enumerate() {
            let mut px: Vec<f64> = polygon.iter().map(|v| v.x).collect();
            let mut py: Vec<f64> = polygon.iter().map(|v| v.y).collect();
            px.push(px[0]);
            py.push(py[0]);
            let color = if i % 2 == 0 { "blue" } else { "green" };
            axes.lines(&px, &py, &[Color(color), LineWidth(2.0)]);
        }
        fg.show_and_keep_running().unwrap();
        true
    });

    let last = planner.current_poses().last().cloned().unwrap();
    println!(
        "final stance: ({:.3}, {:.3}), solver failed last iteration: {}",
        last.translation.x,
        last.translation.y,
        planner.solve_failed()
    );
}
