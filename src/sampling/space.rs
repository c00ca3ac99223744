//! Sampling space definitions and pose/sample/input conversions
//!
//! A sampling space is one of six pose manifolds (planar/spatial x
//! translation/rotation/rigid motion). Each space fixes three dimensions:
//! the flat sample encoding, the classifier input encoding, and the
//! tangent velocity. Poses are always represented as `Isometry3<f64>`;
//! planar spaces embed in the z = 0 plane with rotation about z.

use std::fmt;
use std::str::FromStr;

use nalgebra::{DVector, Isometry3, Quaternion, Translation3, Unit, UnitQuaternion, Vector3};
use rand::Rng;
use rand_distr::{Distribution, UnitSphere};

use crate::common::PlanningError;

/// Closed enumeration of the six supported pose manifolds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplingSpace {
    /// Planar translation (x, y)
    R2,
    /// Planar rotation (yaw)
    SO2,
    /// Planar rigid motion (x, y, yaw)
    SE2,
    /// Spatial translation (x, y, z)
    R3,
    /// Spatial rotation (quaternion)
    SO3,
    /// Spatial rigid motion (translation + quaternion)
    SE3,
}

impl SamplingSpace {
    /// All spaces, for exhaustive iteration in tests and factories
    pub const ALL: [SamplingSpace; 6] = [
        SamplingSpace::R2,
        SamplingSpace::SO2,
        SamplingSpace::SE2,
        SamplingSpace::R3,
        SamplingSpace::SO3,
        SamplingSpace::SE3,
    ];

    /// Dimension of the flat sample encoding
    pub fn sample_dim(self) -> usize {
        match self {
            SamplingSpace::R2 => 2,
            SamplingSpace::SO2 => 1,
            SamplingSpace::SE2 => 3,
            SamplingSpace::R3 => 3,
            SamplingSpace::SO3 => 4,
            SamplingSpace::SE3 => 7,
        }
    }

    /// Dimension of the classifier input encoding.
    ///
    /// Larger than `sample_dim` where an over-parameterized encoding
    /// removes singularities (cos/sin for planar angles).
    pub fn input_dim(self) -> usize {
        match self {
            SamplingSpace::R2 => 2,
            SamplingSpace::SO2 => 2,
            SamplingSpace::SE2 => 4,
            SamplingSpace::R3 => 3,
            SamplingSpace::SO3 => 4,
            SamplingSpace::SE3 => 7,
        }
    }

    /// Dimension of the tangent velocity (true degrees of freedom)
    pub fn vel_dim(self) -> usize {
        match self {
            SamplingSpace::R2 => 2,
            SamplingSpace::SO2 => 1,
            SamplingSpace::SE2 => 3,
            SamplingSpace::R3 => 3,
            SamplingSpace::SO3 => 3,
            SamplingSpace::SE3 => 6,
        }
    }

    /// Convert a pose to its flat sample encoding
    pub fn pose_to_sample(self, pose: &Isometry3<f64>) -> DVector<f64> {
        let t = pose.translation.vector;
        match self {
            SamplingSpace::R2 => DVector::from_vec(vec![t.x, t.y]),
            SamplingSpace::SO2 => DVector::from_vec(vec![pose.rotation.euler_angles().2]),
            SamplingSpace::SE2 => {
                DVector::from_vec(vec![t.x, t.y, pose.rotation.euler_angles().2])
            }
            SamplingSpace::R3 => DVector::from_vec(vec![t.x, t.y, t.z]),
            SamplingSpace::SO3 => {
                let q = canonical_quat_coords(&pose.rotation);
                DVector::from_vec(vec![q[0], q[1], q[2], q[3]])
            }
            SamplingSpace::SE3 => {
                let q = canonical_quat_coords(&pose.rotation);
                DVector::from_vec(vec![t.x, t.y, t.z, q[0], q[1], q[2], q[3]])
            }
        }
    }

    /// Convert a flat sample back to a pose (exact inverse of `pose_to_sample`)
    pub fn sample_to_pose(self, sample: &DVector<f64>) -> Isometry3<f64> {
        match self {
            SamplingSpace::R2 => planar_pose(sample[0], sample[1], 0.0),
            SamplingSpace::SO2 => planar_pose(0.0, 0.0, sample[0]),
            SamplingSpace::SE2 => planar_pose(sample[0], sample[1], sample[2]),
            SamplingSpace::R3 => Isometry3::from_parts(
                Translation3::new(sample[0], sample[1], sample[2]),
                UnitQuaternion::identity(),
            ),
            SamplingSpace::SO3 => Isometry3::from_parts(
                Translation3::identity(),
                quat_from_sample(sample, 0),
            ),
            SamplingSpace::SE3 => Isometry3::from_parts(
                Translation3::new(sample[0], sample[1], sample[2]),
                quat_from_sample(sample, 3),
            ),
        }
    }

    /// Convert a sample to the classifier input encoding.
    ///
    /// The map is injective and normalizing: angles become unit (cos, sin)
    /// pairs, quaternion blocks are renormalized.
    pub fn sample_to_input(self, sample: &DVector<f64>) -> DVector<f64> {
        match self {
            SamplingSpace::R2 | SamplingSpace::R3 => sample.clone(),
            SamplingSpace::SO2 => DVector::from_vec(vec![sample[0].cos(), sample[0].sin()]),
            SamplingSpace::SE2 => {
                DVector::from_vec(vec![sample[0], sample[1], sample[2].cos(), sample[2].sin()])
            }
            SamplingSpace::SO3 => {
                let q = unit_quat_block(sample, 0);
                DVector::from_vec(vec![q[0], q[1], q[2], q[3]])
            }
            SamplingSpace::SE3 => {
                let q = unit_quat_block(sample, 3);
                DVector::from_vec(vec![
                    sample[0], sample[1], sample[2], q[0], q[1], q[2], q[3],
                ])
            }
        }
    }

    /// Convert a classifier input back to a sample (exact inverse of
    /// `sample_to_input` on normalized inputs)
    pub fn input_to_sample(self, input: &DVector<f64>) -> DVector<f64> {
        match self {
            SamplingSpace::R2 | SamplingSpace::R3 | SamplingSpace::SO3 | SamplingSpace::SE3 => {
                input.clone()
            }
            SamplingSpace::SO2 => DVector::from_vec(vec![input[1].atan2(input[0])]),
            SamplingSpace::SE2 => {
                DVector::from_vec(vec![input[0], input[1], input[3].atan2(input[2])])
            }
        }
    }

    /// Project a sample to a 3-D position for point-cloud visualization
    pub fn sample_to_cloud_pos(self, sample: &DVector<f64>) -> Vector3<f64> {
        match self {
            SamplingSpace::R2 | SamplingSpace::SE2 => Vector3::new(sample[0], sample[1], 0.0),
            SamplingSpace::SO2 => Vector3::new(sample[0].cos(), sample[0].sin(), 0.0),
            SamplingSpace::R3 | SamplingSpace::SE3 => {
                Vector3::new(sample[0], sample[1], sample[2])
            }
            SamplingSpace::SO3 => Vector3::new(sample[0], sample[1], sample[2]),
        }
    }

    /// Sample corresponding to the identity pose
    pub fn identity_sample(self) -> DVector<f64> {
        self.pose_to_sample(&Isometry3::identity())
    }

    /// Draw a uniformly random pose within this space.
    ///
    /// Translations are uniform in [-1, 1] per axis, angles uniform in
    /// (-pi, pi), rotation axes uniform on the unit sphere.
    pub fn random_pose<R: Rng + ?Sized>(self, rng: &mut R) -> Isometry3<f64> {
        let pi = std::f64::consts::PI;
        match self {
            SamplingSpace::R2 => planar_pose(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), 0.0),
            SamplingSpace::SO2 => planar_pose(0.0, 0.0, rng.gen_range(-pi..pi)),
            SamplingSpace::SE2 => planar_pose(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-pi..pi),
            ),
            SamplingSpace::R3 => Isometry3::from_parts(
                random_translation(rng),
                UnitQuaternion::identity(),
            ),
            SamplingSpace::SO3 => {
                Isometry3::from_parts(Translation3::identity(), random_rotation(rng))
            }
            SamplingSpace::SE3 => {
                Isometry3::from_parts(random_translation(rng), random_rotation(rng))
            }
        }
    }
}

impl fmt::Display for SamplingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SamplingSpace::R2 => "R2",
            SamplingSpace::SO2 => "SO2",
            SamplingSpace::SE2 => "SE2",
            SamplingSpace::R3 => "R3",
            SamplingSpace::SO3 => "SO3",
            SamplingSpace::SE3 => "SE3",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SamplingSpace {
    type Err = PlanningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R2" => Ok(SamplingSpace::R2),
            "SO2" => Ok(SamplingSpace::SO2),
            "SE2" => Ok(SamplingSpace::SE2),
            "R3" => Ok(SamplingSpace::R3),
            "SO3" => Ok(SamplingSpace::SO3),
            "SE3" => Ok(SamplingSpace::SE3),
            _ => Err(PlanningError::UnsupportedSpace(s.to_string())),
        }
    }
}

/// Build a planar pose embedded in the z = 0 plane
pub fn planar_pose(x: f64, y: f64, yaw: f64) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(x, y, 0.0),
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), yaw),
    )
}

// Quaternion coordinates in (x, y, z, w) order with w >= 0 so that the
// pose -> sample map is single-valued.
fn canonical_quat_coords(q: &UnitQuaternion<f64>) -> [f64; 4] {
    let c = q.coords;
    if c[3] < 0.0 {
        [-c[0], -c[1], -c[2], -c[3]]
    } else {
        [c[0], c[1], c[2], c[3]]
    }
}

// Unit quaternion from a (x, y, z, w) block starting at `offset`.
// A zero-norm block falls back to identity rather than dividing by zero.
pub(crate) fn quat_from_sample(sample: &DVector<f64>, offset: usize) -> UnitQuaternion<f64> {
    let q = Quaternion::from_parts(
        sample[offset + 3],
        Vector3::new(sample[offset], sample[offset + 1], sample[offset + 2]),
    );
    if q.norm() < 1e-12 {
        UnitQuaternion::identity()
    } else {
        UnitQuaternion::from_quaternion(q)
    }
}

fn unit_quat_block(sample: &DVector<f64>, offset: usize) -> [f64; 4] {
    let q = quat_from_sample(sample, offset);
    let c = q.coords;
    [c[0], c[1], c[2], c[3]]
}

fn random_translation<R: Rng + ?Sized>(rng: &mut R) -> Translation3<f64> {
    Translation3::new(
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
    )
}

fn random_rotation<R: Rng + ?Sized>(rng: &mut R) -> UnitQuaternion<f64> {
    let axis: [f64; 3] = UnitSphere.sample(rng);
    let angle = rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI);
    UnitQuaternion::from_axis_angle(
        &Unit::new_normalize(Vector3::new(axis[0], axis[1], axis[2])),
        angle,
    )
}
