//! Skeleton metadata: joint names, kinematic tree and left/right mirroring.

use crate::sample::SampleError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-dataset joint metadata.
///
/// Invariants (checked at construction):
/// * `mirror` is an involution: `mirror[mirror[j]] == j`,
/// * following `parent` from any joint reaches a root that is its own parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointInfo {
    names: Vec<String>,
    parent: Vec<usize>,
    mirror: Vec<usize>,
    key_index: usize,
}

impl JointInfo {
    pub fn new(
        names: Vec<String>,
        parent: Vec<usize>,
        mirror: Vec<usize>,
        key_index: usize,
    ) -> Result<Self, SampleError> {
        let n = names.len();
        if parent.len() != n || mirror.len() != n {
            return Err(SampleError::InvalidJointInfo(format!(
                "{n} names but {} parents and {} mirrors",
                parent.len(),
                mirror.len()
            )));
        }
        if key_index >= n {
            return Err(SampleError::InvalidJointInfo(format!(
                "Key index {key_index} out of range for {n} joints"
            )));
        }
        for (j, &m) in mirror.iter().enumerate() {
            if m >= n || mirror[m] != j {
                return Err(SampleError::InvalidJointInfo(format!(
                    "Mirror of '{}' is not an involution",
                    names[j]
                )));
            }
        }
        for (j, &p) in parent.iter().enumerate() {
            if p >= n {
                return Err(SampleError::InvalidJointInfo(format!(
                    "Parent of '{}' out of range",
                    names[j]
                )));
            }
        }
        for start in 0..n {
            let mut joint = start;
            let mut steps = 0;
            while parent[joint] != joint {
                joint = parent[joint];
                steps += 1;
                if steps > n {
                    return Err(SampleError::InvalidJointInfo(format!(
                        "Kinematic tree has a cycle through '{}'",
                        names[start]
                    )));
                }
            }
        }

        Ok(JointInfo {
            names,
            parent,
            mirror,
            key_index,
        })
    }

    /// Builds joint metadata from name tables.
    ///
    /// `parents` lists `(child, parent)` pairs and `mirrors` lists each
    /// left/right pair once. Joints absent from a table map to themselves.
    pub fn from_tables(
        names: &[&str],
        parents: &[(&str, &str)],
        mirrors: &[(&str, &str)],
        base_joint: &str,
    ) -> Result<Self, SampleError> {
        let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let lookup = |name: &str| {
            index.get(name).copied().ok_or_else(|| {
                SampleError::InvalidJointInfo(format!("Unknown joint name '{name}'"))
            })
        };

        let mut parent: Vec<usize> = (0..names.len()).collect();
        for (child, up) in parents {
            parent[lookup(child)?] = lookup(up)?;
        }
        let mut mirror: Vec<usize> = (0..names.len()).collect();
        for (left, right) in mirrors {
            let (l, r) = (lookup(left)?, lookup(right)?);
            mirror[l] = r;
            mirror[r] = l;
        }

        JointInfo::new(
            names.iter().map(|n| n.to_string()).collect(),
            parent,
            mirror,
            lookup(base_joint)?,
        )
    }

    /// The 19-joint skeleton of the panoptic studio HD recordings.
    pub fn cmu_panoptic() -> Result<Self, SampleError> {
        JointInfo::from_tables(
            &[
                "neck", "nose", "pelv", "lsho", "lelb", "lwri", "lhip", "lkne", "lank", "rsho",
                "relb", "rwri", "rhip", "rkne", "rank", "leye", "lear", "reye", "rear",
            ],
            &[
                ("neck", "pelv"),
                ("nose", "neck"),
                ("lsho", "neck"),
                ("lelb", "lsho"),
                ("lwri", "lelb"),
                ("lhip", "pelv"),
                ("lkne", "lhip"),
                ("lank", "lkne"),
                ("rsho", "neck"),
                ("relb", "rsho"),
                ("rwri", "relb"),
                ("rhip", "pelv"),
                ("rkne", "rhip"),
                ("rank", "rkne"),
                ("leye", "nose"),
                ("lear", "leye"),
                ("reye", "nose"),
                ("rear", "reye"),
            ],
            &[
                ("lsho", "rsho"),
                ("lelb", "relb"),
                ("lwri", "rwri"),
                ("lhip", "rhip"),
                ("lkne", "rkne"),
                ("lank", "rank"),
                ("leye", "reye"),
                ("lear", "rear"),
            ],
            "pelv",
        )
    }

    /// The 25-joint Kinect v2 skeleton used by the depth-video datasets.
    pub fn kinect() -> Result<Self, SampleError> {
        JointInfo::from_tables(
            &[
                "pelv", "spin", "neck", "head", "lsho", "lelb", "lwri", "lhan", "rsho", "relb",
                "rwri", "rhan", "lhip", "lkne", "lank", "lfoo", "rhip", "rkne", "rank", "rfoo",
                "thor", "ltip", "lthu", "rtip", "rthu",
            ],
            &[
                ("spin", "pelv"),
                ("thor", "spin"),
                ("neck", "thor"),
                ("head", "neck"),
                ("lsho", "thor"),
                ("lelb", "lsho"),
                ("lwri", "lelb"),
                ("lhan", "lwri"),
                ("ltip", "lhan"),
                ("lthu", "lhan"),
                ("rsho", "thor"),
                ("relb", "rsho"),
                ("rwri", "relb"),
                ("rhan", "rwri"),
                ("rtip", "rhan"),
                ("rthu", "rhan"),
                ("lhip", "pelv"),
                ("lkne", "lhip"),
                ("lank", "lkne"),
                ("lfoo", "lank"),
                ("rhip", "pelv"),
                ("rkne", "rhip"),
                ("rank", "rkne"),
                ("rfoo", "rank"),
            ],
            &[
                ("lsho", "rsho"),
                ("lelb", "relb"),
                ("lwri", "rwri"),
                ("lhan", "rhan"),
                ("ltip", "rtip"),
                ("lthu", "rthu"),
                ("lhip", "rhip"),
                ("lkne", "rkne"),
                ("lank", "rank"),
                ("lfoo", "rfoo"),
            ],
            "pelv",
        )
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn parent(&self) -> &[usize] {
        &self.parent
    }

    pub fn mirror(&self) -> &[usize] {
        &self.mirror
    }

    pub fn key_index(&self) -> usize {
        self.key_index
    }

    pub fn num_joints(&self) -> usize {
        self.names.len()
    }

    /// Reorders per-joint values so that entry `j` holds the value of `mirror[j]`.
    pub fn mirrored<T: Clone>(&self, values: &[T]) -> Vec<T> {
        self.mirror.iter().map(|&m| values[m].clone()).collect()
    }
}
