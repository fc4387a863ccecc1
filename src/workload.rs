//! Workload templates and the per-trial workload descriptor handed to the benchmark client.
//!
//! A `WorkloadTemplate` holds, for every parameter the benchmark client understands, either a
//! single value or a list of candidate values. Two of the parameters are swept in a campaign; a
//! `SweepPoint` picks one candidate for each, and `RunConfiguration::resolve` turns the template
//! and the point into the concrete configuration for one trial.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use failure::ResultExt;
use failure_derive::Fail;

use log::{debug, warn};

use serde::{Deserialize, Serialize};

/// The benchmark-facing port of every server is its cluster port plus this offset.
pub const CLIENT_PORT_OFFSET: u16 = 1000;

/// How far the sum of `opsRatio` may stray from 1.0. The client uses the same tolerance.
const RATIO_EPSILON: f64 = 1e-4;

/// The kind of replicated data structure the benchmark operates on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeCode {
    /// Positive-negative counter.
    Pnc,
    /// Observed-remove set.
    Orset,
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeCode::Pnc => write!(f, "pnc"),
            TypeCode::Orset => write!(f, "orset"),
        }
    }
}

/// A template field: either one value, or the ordered candidates of a sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Param<T> {
    /// All values held by this field, in order.
    pub fn candidates(&self) -> &[T] {
        match self {
            Param::One(value) => std::slice::from_ref(value),
            Param::Many(values) => values.as_slice(),
        }
    }

    pub fn is_sequence(&self) -> bool {
        match self {
            Param::One(_) => false,
            Param::Many(_) => true,
        }
    }
}

impl<T: Clone> Param<T> {
    /// This field as it goes into a workload descriptor when it is not swept. A list of one value
    /// is that value; longer lists are handed to the client as they are.
    pub fn fixed(&self) -> Param<T> {
        match self {
            Param::Many(values) if values.len() == 1 => Param::One(values[0].clone()),
            other => other.clone(),
        }
    }
}

/// The parameters of a benchmark workload. Field names follow the client's configuration format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkloadTemplate {
    pub client_threads: Param<u32>,
    pub type_code: Param<TypeCode>,
    pub num_objs: Param<u32>,
    /// Seconds.
    pub duration: Param<u32>,
    /// Read/write/other mix.
    pub ops_ratio: Param<[f64; 3]>,
    /// Fraction of operations that go through the safe (consensus) path.
    pub safe_ratio: Param<f64>,
    /// 0 means unthrottled.
    #[serde(rename = "targetOutputTPS")]
    pub target_output_tps: Param<u32>,
}

/// A template field that can be swept.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    #[serde(rename = "clientThreads")]
    ClientThreads,
    #[serde(rename = "typeCode")]
    TypeCode,
    #[serde(rename = "numObjs")]
    NumObjs,
    #[serde(rename = "duration")]
    Duration,
    #[serde(rename = "opsRatio")]
    OpsRatio,
    #[serde(rename = "safeRatio")]
    SafeRatio,
    #[serde(rename = "targetOutputTPS")]
    TargetOutputTps,
}

impl Dimension {
    pub const ALL: [Dimension; 7] = [
        Dimension::ClientThreads,
        Dimension::TypeCode,
        Dimension::NumObjs,
        Dimension::Duration,
        Dimension::OpsRatio,
        Dimension::SafeRatio,
        Dimension::TargetOutputTps,
    ];

    /// The field name used in templates and workload descriptors.
    pub fn name(self) -> &'static str {
        match self {
            Dimension::ClientThreads => "clientThreads",
            Dimension::TypeCode => "typeCode",
            Dimension::NumObjs => "numObjs",
            Dimension::Duration => "duration",
            Dimension::OpsRatio => "opsRatio",
            Dimension::SafeRatio => "safeRatio",
            Dimension::TargetOutputTps => "targetOutputTPS",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Dimension {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .iter()
            .copied()
            .find(|dim| dim.name() == s)
            .ok_or_else(|| TemplateError::UnknownDimension(s.into()))
    }
}

/// A single concrete value of some template field.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ParamValue {
    Count(u32),
    Type(TypeCode),
    Ratio(f64),
    Mix([f64; 3]),
}

impl ParamValue {
    /// A rendering of the value that is safe to use in a file name.
    pub fn slug(&self) -> String {
        match self {
            ParamValue::Mix([a, b, c]) => format!("{}_{}_{}", a, b, c),
            other => other.to_string(),
        }
    }

    fn as_count(self, dim: Dimension) -> Result<u32, TemplateError> {
        match self {
            ParamValue::Count(n) => Ok(n),
            other => Err(TemplateError::wrong_kind(dim, other)),
        }
    }

    fn as_type(self, dim: Dimension) -> Result<TypeCode, TemplateError> {
        match self {
            ParamValue::Type(t) => Ok(t),
            other => Err(TemplateError::wrong_kind(dim, other)),
        }
    }

    fn as_ratio(self, dim: Dimension) -> Result<f64, TemplateError> {
        match self {
            ParamValue::Ratio(r) => Ok(r),
            other => Err(TemplateError::wrong_kind(dim, other)),
        }
    }

    fn as_mix(self, dim: Dimension) -> Result<[f64; 3], TemplateError> {
        match self {
            ParamValue::Mix(mix) => Ok(mix),
            other => Err(TemplateError::wrong_kind(dim, other)),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Count(n) => write!(f, "{}", n),
            ParamValue::Type(t) => write!(f, "{}", t),
            ParamValue::Ratio(r) => write!(f, "{}", r),
            ParamValue::Mix([a, b, c]) => write!(f, "[{}, {}, {}]", a, b, c),
        }
    }
}

/// Something is wrong with a workload template or the way a campaign sweeps it.
#[derive(Debug, Fail, PartialEq)]
pub enum TemplateError {
    #[fail(display = "unknown workload parameter `{}`", _0)]
    UnknownDimension(String),

    #[fail(display = "`{}` cannot be both the primary and the secondary dimension", _0)]
    SameDimension(Dimension),

    #[fail(display = "`{}` is swept, so it must hold a non-empty list of values", _0)]
    NotASequence(Dimension),

    #[fail(display = "`{}` holds no values", _0)]
    Empty(Dimension),

    #[fail(
        display = "cluster base port {} leaves no room for the client port (base + 1000)",
        _0
    )]
    ClientPortOutOfRange(u16),

    #[fail(display = "invalid value {} for `{}`: {}", value, dim, reason)]
    Invalid {
        dim: Dimension,
        value: String,
        reason: &'static str,
    },
}

impl TemplateError {
    fn wrong_kind(dim: Dimension, value: ParamValue) -> Self {
        TemplateError::Invalid {
            dim,
            value: value.to_string(),
            reason: "value has the wrong type for this parameter",
        }
    }
}

impl WorkloadTemplate {
    /// All values held by the given field, in template order.
    pub fn candidates(&self, dim: Dimension) -> Vec<ParamValue> {
        match dim {
            Dimension::ClientThreads => counts(&self.client_threads),
            Dimension::TypeCode => self
                .type_code
                .candidates()
                .iter()
                .map(|&t| ParamValue::Type(t))
                .collect(),
            Dimension::NumObjs => counts(&self.num_objs),
            Dimension::Duration => counts(&self.duration),
            Dimension::OpsRatio => self
                .ops_ratio
                .candidates()
                .iter()
                .map(|&mix| ParamValue::Mix(mix))
                .collect(),
            Dimension::SafeRatio => self
                .safe_ratio
                .candidates()
                .iter()
                .map(|&r| ParamValue::Ratio(r))
                .collect(),
            Dimension::TargetOutputTps => counts(&self.target_output_tps),
        }
    }

    fn is_sequence(&self, dim: Dimension) -> bool {
        match dim {
            Dimension::ClientThreads => self.client_threads.is_sequence(),
            Dimension::TypeCode => self.type_code.is_sequence(),
            Dimension::NumObjs => self.num_objs.is_sequence(),
            Dimension::Duration => self.duration.is_sequence(),
            Dimension::OpsRatio => self.ops_ratio.is_sequence(),
            Dimension::SafeRatio => self.safe_ratio.is_sequence(),
            Dimension::TargetOutputTps => self.target_output_tps.is_sequence(),
        }
    }

    /// Check that `primary` and `secondary` can be swept over this template: they must differ,
    /// each must hold a non-empty list, no other field may be an empty list, and every value must
    /// be acceptable to the benchmark client.
    ///
    /// A field that is not swept but holds several values is allowed; it is copied into every
    /// descriptor as a list.
    pub fn validate(&self, primary: Dimension, secondary: Dimension) -> Result<(), TemplateError> {
        if primary == secondary {
            return Err(TemplateError::SameDimension(primary));
        }

        for &dim in [primary, secondary].iter() {
            if !self.is_sequence(dim) || self.candidates(dim).is_empty() {
                return Err(TemplateError::NotASequence(dim));
            }
        }

        for &dim in Dimension::ALL.iter() {
            let candidates = self.candidates(dim);

            if dim != primary && dim != secondary {
                match candidates.len() {
                    0 => return Err(TemplateError::Empty(dim)),
                    1 => {}
                    n => warn!(
                        "`{}` is not swept but holds {} values; every descriptor gets all of them",
                        dim, n
                    ),
                }
            }

            for value in candidates {
                check_value(dim, value)?;
            }
        }

        Ok(())
    }
}

fn counts(param: &Param<u32>) -> Vec<ParamValue> {
    param
        .candidates()
        .iter()
        .map(|&n| ParamValue::Count(n))
        .collect()
}

/// Reject values the benchmark client would refuse to run with.
fn check_value(dim: Dimension, value: ParamValue) -> Result<(), TemplateError> {
    let invalid = |reason: &'static str| -> Result<(), TemplateError> {
        Err(TemplateError::Invalid {
            dim,
            value: value.to_string(),
            reason,
        })
    };

    match (dim, value) {
        (Dimension::ClientThreads, ParamValue::Count(0)) => invalid("must be greater than 0"),
        (Dimension::NumObjs, ParamValue::Count(0)) => invalid("must be greater than 0"),
        (Dimension::Duration, ParamValue::Count(0)) => invalid("must be greater than 0"),
        (Dimension::SafeRatio, ParamValue::Ratio(r)) if !(0.0..=1.0).contains(&r) => {
            invalid("must be between 0 and 1")
        }
        (Dimension::OpsRatio, ParamValue::Mix(mix)) => {
            if mix.iter().any(|r| *r < 0.0) {
                invalid("ratios must not be negative")
            } else if (mix.iter().sum::<f64>() - 1.0).abs() > RATIO_EPSILON {
                invalid("ratios must sum to 1")
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}

/// One field fixed to one value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Assignment {
    pub dim: Dimension,
    pub value: ParamValue,
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.dim, self.value)
    }
}

/// A point in the sweep: one value for the primary and one for the secondary dimension.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SweepPoint {
    pub primary: Assignment,
    pub secondary: Assignment,
}

impl SweepPoint {
    /// The value this point assigns to `dim`, if it assigns one.
    pub fn value_of(&self, dim: Dimension) -> Option<ParamValue> {
        if self.primary.dim == dim {
            Some(self.primary.value)
        } else if self.secondary.dim == dim {
            Some(self.secondary.value)
        } else {
            None
        }
    }

    /// The name of the workload descriptor for this point. It depends only on the swept values, so
    /// two campaigns running at once in the same work directory would collide.
    pub fn descriptor_file_name(&self) -> String {
        format!(
            "{}-{}.json",
            self.primary.value.slug(),
            self.secondary.value.slug()
        )
    }
}

impl fmt::Display for SweepPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.primary, self.secondary)
    }
}

/// The port the benchmark client connects to when the cluster starts at `cluster_base_port`.
pub fn client_port(cluster_base_port: u16) -> Result<u16, TemplateError> {
    cluster_base_port
        .checked_add(CLIENT_PORT_OFFSET)
        .ok_or(TemplateError::ClientPortOutOfRange(cluster_base_port))
}

/// The benchmark-facing address of every host, in host order.
pub fn client_addresses(
    hosts: &[String],
    cluster_base_port: u16,
) -> Result<Vec<String>, TemplateError> {
    let port = client_port(cluster_base_port)?;
    Ok(hosts
        .iter()
        .map(|host| format!("{}:{}", host, port))
        .collect())
}

/// The configuration of one trial, in the format the benchmark client reads. The swept fields
/// always hold one value; the others are copied from the template (see `Param::fixed`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfiguration {
    pub addresses: Vec<String>,
    pub client_threads: Param<u32>,
    pub duration: Param<u32>,
    pub type_code: Param<TypeCode>,
    pub num_objs: Param<u32>,
    pub ops_ratio: Param<[f64; 3]>,
    pub safe_ratio: Param<f64>,
    #[serde(rename = "targetOutputTPS")]
    pub target_output_tps: Param<u32>,
}

impl RunConfiguration {
    /// Fix the swept fields of `template` to the values of `point` and point the client at
    /// `hosts`. The template itself is left untouched.
    pub fn resolve(
        template: &WorkloadTemplate,
        point: &SweepPoint,
        hosts: &[String],
        cluster_base_port: u16,
    ) -> Result<Self, TemplateError> {
        let t = template;
        let count = ParamValue::as_count;

        Ok(RunConfiguration {
            addresses: client_addresses(hosts, cluster_base_port)?,
            client_threads: fix(&t.client_threads, Dimension::ClientThreads, point, count)?,
            duration: fix(&t.duration, Dimension::Duration, point, count)?,
            type_code: fix(&t.type_code, Dimension::TypeCode, point, ParamValue::as_type)?,
            num_objs: fix(&t.num_objs, Dimension::NumObjs, point, count)?,
            ops_ratio: fix(&t.ops_ratio, Dimension::OpsRatio, point, ParamValue::as_mix)?,
            safe_ratio: fix(&t.safe_ratio, Dimension::SafeRatio, point, ParamValue::as_ratio)?,
            target_output_tps: fix(&t.target_output_tps, Dimension::TargetOutputTps, point, count)?,
        })
    }
}

/// The value of one descriptor field: the point's value if `dim` is swept, the template's
/// otherwise.
fn fix<T, F>(
    param: &Param<T>,
    dim: Dimension,
    point: &SweepPoint,
    convert: F,
) -> Result<Param<T>, TemplateError>
where
    T: Clone,
    F: Fn(ParamValue, Dimension) -> Result<T, TemplateError>,
{
    match point.value_of(dim) {
        Some(value) => Ok(Param::One(convert(value, dim)?)),
        None => Ok(param.fixed()),
    }
}

/// A workload descriptor written to disk for one trial. The file is removed when this value is
/// dropped, so it never outlives the trial that created it.
#[derive(Debug)]
pub struct DescriptorFile {
    path: PathBuf,
}

impl DescriptorFile {
    /// Serialize `config` into `dir`, under the name derived from `point`.
    pub fn create(
        dir: &Path,
        point: &SweepPoint,
        config: &RunConfiguration,
    ) -> Result<Self, failure::Error> {
        let path = dir.join(point.descriptor_file_name());
        let contents = serde_json::to_string(config)?;

        fs::write(&path, contents)
            .with_context(|_| format!("writing workload descriptor {}", path.display()))?;

        debug!("Wrote workload descriptor {}", path.display());

        Ok(DescriptorFile { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DescriptorFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed workload descriptor {}", self.path.display()),
            Err(ref err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "Unable to remove workload descriptor {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}
