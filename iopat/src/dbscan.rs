// Copyright (c) Facebook, Inc. and its affiliates.

//! Density based clustering.
//!
//! Points are visited in input order and clusters are expanded breadth
//! first, so the labels are a pure function of the input.
use std::collections::VecDeque;

use super::cluster::ClusterStrategy;
use super::error::ClusteringFailed;
use iopat_intf::NOISE_CLUSTER;

#[derive(Clone, Debug, PartialEq)]
pub struct Dbscan {
    pub eps: f64,
    pub min_samples: usize,
}

impl Dbscan {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    fn dist2(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    /// Indices within `eps` of `points[idx]`, including `idx` itself.
    fn neighbors(&self, points: &[Vec<f64>], idx: usize) -> Vec<usize> {
        let eps2 = self.eps * self.eps;
        (0..points.len())
            .filter(|&j| Self::dist2(&points[idx], &points[j]) <= eps2)
            .collect()
    }
}

impl ClusterStrategy for Dbscan {
    fn name(&self) -> String {
        format!("dbscan(eps={},min_samples={})", self.eps, self.min_samples)
    }

    fn cluster(&self, points: &[Vec<f64>]) -> Result<Vec<i64>, ClusteringFailed> {
        if !(self.eps > 0.0) || !self.eps.is_finite() {
            return Err(ClusteringFailed::InvalidInput(format!(
                "eps {} is not a positive number",
                self.eps
            )));
        }
        if let Some(first) = points.first() {
            if points.iter().any(|p| p.len() != first.len()) {
                return Err(ClusteringFailed::InvalidInput(
                    "points have differing dimensions".into(),
                ));
            }
        }

        let min_samples = self.min_samples.max(1);
        let mut labels: Vec<Option<i64>> = vec![None; points.len()];
        let mut next_id = 0;

        for i in 0..points.len() {
            if labels[i].is_some() {
                continue;
            }
            let nbrs = self.neighbors(points, i);
            if nbrs.len() < min_samples {
                // May still be claimed as a border point later.
                labels[i] = Some(NOISE_CLUSTER);
                continue;
            }

            let id = next_id;
            next_id += 1;
            labels[i] = Some(id);

            let mut queue: VecDeque<usize> = nbrs.into_iter().collect();
            while let Some(j) = queue.pop_front() {
                match labels[j] {
                    Some(NOISE_CLUSTER) => {
                        labels[j] = Some(id);
                        continue;
                    }
                    Some(_) => continue,
                    None => labels[j] = Some(id),
                }
                let nbrs = self.neighbors(points, j);
                if nbrs.len() >= min_samples {
                    queue.extend(nbrs);
                }
            }
        }

        Ok(labels
            .into_iter()
            .map(|l| l.unwrap_or(NOISE_CLUSTER))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_blobs_and_noise() {
        let points = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![5.0, 5.0],
            vec![5.1, 5.0],
            vec![5.0, 5.1],
            vec![20.0, -20.0],
        ];
        let db = Dbscan::new(0.5, 3);
        let labels = db.cluster(&points).unwrap();
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1, NOISE_CLUSTER]);
        assert_eq!(db.cluster(&points).unwrap(), labels);
        assert_eq!(db.seed(), None);
    }

    #[test]
    fn test_border_point() {
        // The last point only reaches one core point and joins as border.
        let points = vec![vec![0.0], vec![0.5], vec![1.0], vec![1.9]];
        let labels = Dbscan::new(1.0, 3).cluster(&points).unwrap();
        assert_eq!(labels, vec![0, 0, 0, 0]);

        let labels = Dbscan::new(1.0, 3).cluster(&[vec![0.0], vec![3.0]]).unwrap();
        assert_eq!(labels, vec![NOISE_CLUSTER, NOISE_CLUSTER]);
    }

    #[test]
    fn test_invalid() {
        assert!(Dbscan::new(0.0, 3).cluster(&[vec![0.0]]).is_err());
        assert!(Dbscan::new(1.0, 3)
            .cluster(&[vec![0.0], vec![0.0, 1.0]])
            .is_err());
        assert_eq!(Dbscan::new(1.0, 3).cluster(&[]).unwrap().len(), 0);
    }
}
