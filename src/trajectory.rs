use std::path::Path;

use anyhow::{bail, Context, Result};

// (時刻, 状態, 入力) の時系列。ループが追記し、CSV出力が読む
// 実験の再実行時は reset で空に戻す
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History<const X: usize, const U: usize> {
    t: Vec<f64>,
    x: Vec<na::SVector<f64, X>>,
    u: Vec<na::SVector<f64, U>>,
}

impl<const X: usize, const U: usize> History<X, U> {
    pub fn new() -> Self {
        Self {
            t: Vec::new(),
            x: Vec::new(),
            u: Vec::new(),
        }
    }

    pub fn push(&mut self, t: f64, x: &na::SVector<f64, X>, u: &na::SVector<f64, U>) {
        self.t.push(t);
        self.x.push(*x);
        self.u.push(*u);
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn reset(&mut self) {
        self.t.clear();
        self.x.clear();
        self.u.clear();
    }

    pub fn t(&self) -> &[f64] {
        &self.t
    }

    pub fn x(&self) -> &[na::SVector<f64, X>] {
        &self.x
    }

    pub fn u(&self) -> &[na::SVector<f64, U>] {
        &self.u
    }

    // 1行 = [t, x..., u...]。to_stringの最短表現なので読み戻しで値が一致する
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path.as_ref())
            .with_context(|| format!("failed to open {}", path.as_ref().display()))?;
        for i in 0..self.len() {
            let mut record = Vec::with_capacity(1 + X + U);
            record.push(self.t[i].to_string());
            record.extend(self.x[i].iter().map(|v| v.to_string()));
            record.extend(self.u[i].iter().map(|v| v.to_string()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path.as_ref())
            .with_context(|| format!("failed to open {}", path.as_ref().display()))?;
        let mut history = Self::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            if record.len() != 1 + X + U {
                bail!(
                    "row {}: expected {} fields, got {}",
                    row,
                    1 + X + U,
                    record.len()
                );
            }
            let parse = |i: usize| -> Result<f64> {
                record[i]
                    .parse()
                    .with_context(|| format!("row {}: bad float in field {}", row, i))
            };
            let t = parse(0)?;
            let mut x = na::SVector::<f64, X>::zeros();
            for i in 0..X {
                x[i] = parse(1 + i)?;
            }
            let mut u = na::SVector::<f64, U>::zeros();
            for i in 0..U {
                u[i] = parse(1 + X + i)?;
            }
            history.push(t, &x, &u);
        }
        Ok(history)
    }
}
