//! Build-argument matrix expansion.
//!
//! A declaration may carry named axes (e.g. `branch: [master, dev]`,
//! `mode: [debug, release]`); every combination becomes its own node. Axes are
//! ordered by name and values keep their declared order, so expansion is
//! stable across runs: `test` with the axes above yields `test-master-debug`,
//! `test-master-release`, `test-dev-debug`, `test-dev-release`.

use std::collections::BTreeMap;

/// One named axis and its candidate values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixAxis {
  pub name: String,
  pub values: Vec<String>,
}

/// One combination of axis values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
  /// Axis name -> chosen value.
  pub values: BTreeMap<String, String>,
  /// Chosen values in axis order, used for the node id suffix.
  pub suffix: Vec<String>,
}

impl Variant {
  /// Node id for this variant: `<base>-<v1>-<v2>...`, or `base` alone when
  /// the matrix has no axes.
  pub fn node_id(&self, base: &str) -> String {
    if self.suffix.is_empty() {
      return base.to_string();
    }
    format!("{}-{}", base, self.suffix.join("-"))
  }
}

/// Cartesian product generator over named axes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildMatrix {
  axes: Vec<MatrixAxis>,
}

impl BuildMatrix {
  pub fn new(axes: BTreeMap<String, Vec<String>>) -> Self {
    Self {
      axes: axes
        .into_iter()
        .map(|(name, values)| MatrixAxis { name, values })
        .collect(),
    }
  }

  pub fn axes(&self) -> &[MatrixAxis] {
    &self.axes
  }

  /// Number of combinations. An empty matrix has exactly one (empty) variant.
  pub fn size(&self) -> usize {
    self.axes.iter().map(|a| a.values.len()).product()
  }

  /// All combinations, varying the last axis fastest.
  pub fn variants(&self) -> Vec<Variant> {
    let total = self.size();
    let mut out = Vec::with_capacity(total);
    if total == 0 {
      return out;
    }

    let mut cursor = vec![0usize; self.axes.len()];
    loop {
      let mut values = BTreeMap::new();
      let mut suffix = Vec::with_capacity(self.axes.len());
      for (axis, &idx) in self.axes.iter().zip(&cursor) {
        let value = axis.values[idx].clone();
        values.insert(axis.name.clone(), value.clone());
        suffix.push(value);
      }
      out.push(Variant { values, suffix });

      // Odometer increment from the rightmost axis
      let mut pos = self.axes.len();
      loop {
        if pos == 0 {
          return out;
        }
        pos -= 1;
        cursor[pos] += 1;
        if cursor[pos] < self.axes[pos].values.len() {
          break;
        }
        cursor[pos] = 0;
      }
    }
  }
}
