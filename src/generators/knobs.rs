use super::{
    ActionGenerator, ActionStream, FactsSnafu, GeneratorError, InvalidIntervalSnafu,
    NoCurrentValueSnafu, NotNumericSnafu, OutOfRangeSnafu,
};
use crate::facts::{CatalogFacts, ParamType, ParameterInfo};
use crate::models::{Action, ParamValue, ParameterTarget, DEFAULT_PRECISION};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Slack allowed when comparing sweep positions and candidates against their bounds.
const SWEEP_TOLERANCE: f64 = 1e-9;

const BOOL_WORDS: [&str; 4] = ["on", "off", "true", "false"];

/// How a sweep position turns into a candidate setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KnobMode {
    /// current × change
    #[default]
    #[serde(alias = "pct")]
    Pct,
    /// current + change
    #[serde(alias = "delta")]
    Delta,
    /// change
    #[serde(alias = "absolute")]
    Absolute,
    /// 2^change
    #[serde(alias = "pow2")]
    Pow2,
}

fn default_min() -> f64 {
    0.1
}

fn default_max() -> f64 {
    5.0
}

fn default_interval() -> f64 {
    0.1
}

fn default_precision() -> u32 {
    DEFAULT_PRECISION
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumericalKnobArgs {
    #[serde(alias = "knob_name", alias = "name")]
    pub parameter: String,
    #[serde(default)]
    pub mode: KnobMode,
    #[serde(default = "default_min")]
    pub min_val: f64,
    #[serde(default = "default_max")]
    pub max_val: f64,
    #[serde(default = "default_interval")]
    pub interval: f64,
    #[serde(default = "default_precision")]
    pub precision: u32,
    #[serde(default, alias = "alterSystem")]
    pub alter_system: bool,
}

impl NumericalKnobArgs {
    pub fn new(parameter: impl Into<String>, mode: KnobMode) -> Self {
        Self {
            parameter: parameter.into(),
            mode,
            min_val: default_min(),
            max_val: default_max(),
            interval: default_interval(),
            precision: default_precision(),
            alter_system: false,
        }
    }

    pub fn sweep(mut self, min_val: f64, max_val: f64, interval: f64) -> Self {
        self.min_val = min_val;
        self.max_val = max_val;
        self.interval = interval;
        self
    }
}

/// Sweeps a numeric parameter across a range of candidate settings.
#[derive(Debug)]
pub struct NumericalKnobGenerator {
    target: Arc<ParameterTarget>,
    vartype: ParamType,
    current: f64,
    legal_min: f64,
    legal_max: f64,
    mode: KnobMode,
    min_val: f64,
    max_val: f64,
    interval: f64,
    alter_system: bool,
}

impl NumericalKnobGenerator {
    pub fn new(facts: &dyn CatalogFacts, args: NumericalKnobArgs) -> Result<Self, GeneratorError> {
        ensure!(
            args.interval > 0.0,
            InvalidIntervalSnafu {
                interval: args.interval
            }
        );

        let info = facts.parameter_info(&args.parameter).context(FactsSnafu)?;
        ensure!(
            info.vartype.is_numeric(),
            NotNumericSnafu {
                parameter: info.name.clone(),
                vartype: info.vartype.as_str(),
            }
        );

        // Only relative modes need a starting point.
        let current = match args.mode {
            KnobMode::Pct | KnobMode::Delta => {
                info.current_numeric().context(NoCurrentValueSnafu {
                    parameter: info.name.clone(),
                    value: info.current_value.clone(),
                })?
            }
            KnobMode::Absolute | KnobMode::Pow2 => info.current_numeric().unwrap_or_default(),
        };

        debug!(
            "Sweeping {} ({}) from {} to {} by {} in {:?} mode",
            info.name,
            info.vartype.as_str(),
            args.min_val,
            args.max_val,
            args.interval,
            args.mode
        );

        Ok(Self {
            target: Arc::new(ParameterTarget::new(info.name.clone(), args.precision)),
            vartype: info.vartype,
            current,
            legal_min: info.min_val.unwrap_or(f64::NEG_INFINITY),
            legal_max: info.max_val.unwrap_or(f64::INFINITY),
            mode: args.mode,
            min_val: args.min_val,
            max_val: args.max_val,
            interval: args.interval,
            alter_system: args.alter_system,
        })
    }

    fn candidate(&self, change: f64) -> Result<Action, GeneratorError> {
        let raw = match self.mode {
            KnobMode::Pct => self.current * change,
            KnobMode::Delta => self.current + change,
            KnobMode::Absolute => change,
            KnobMode::Pow2 => 2f64.powf(change),
        };

        // The unrounded candidate must already be legal.
        ensure!(
            raw >= self.legal_min - SWEEP_TOLERANCE && raw <= self.legal_max + SWEEP_TOLERANCE,
            OutOfRangeSnafu {
                parameter: self.target.name(),
                value: raw,
                min: self.legal_min,
                max: self.legal_max,
            }
        );

        let value = match self.vartype {
            ParamType::Integer => raw.round(),
            _ => round_to(raw, self.target.precision()),
        };

        let setting = match self.vartype {
            ParamType::Integer => ParamValue::Int(value as i64),
            _ => ParamValue::Float(value),
        };
        Ok(Action::set_parameter(
            Arc::clone(&self.target),
            Some(setting),
            self.alter_system,
        ))
    }
}

impl ActionGenerator for NumericalKnobGenerator {
    fn actions(&self) -> ActionStream<'_> {
        let mut step: u32 = 0;
        let mut finished = false;
        Box::new(std::iter::from_fn(move || {
            if finished {
                return None;
            }
            let change = self.min_val + f64::from(step) * self.interval;
            if change > self.max_val + SWEEP_TOLERANCE {
                finished = true;
                return None;
            }
            step += 1;

            let candidate = self.candidate(change);
            // An illegal setting ends the sweep.
            finished = candidate.is_err();
            Some(candidate)
        }))
    }
}

fn round_to(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (value * scale).round() / scale
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoricalKnobArgs {
    #[serde(alias = "knob_name", alias = "name")]
    pub parameter: String,
    pub values: Vec<ParamValue>,
    #[serde(default, alias = "alterSystem")]
    pub alter_system: bool,
}

/// Proposes each legal value from a fixed list of settings.
#[derive(Debug)]
pub struct CategoricalKnobGenerator {
    target: Arc<ParameterTarget>,
    vartype: ParamType,
    legal: Vec<ParamValue>,
    illegal: Vec<ParamValue>,
    alter_system: bool,
}

impl CategoricalKnobGenerator {
    pub fn new(
        facts: &dyn CatalogFacts,
        args: CategoricalKnobArgs,
    ) -> Result<Self, GeneratorError> {
        let info = facts.parameter_info(&args.parameter).context(FactsSnafu)?;

        let (legal, illegal): (Vec<_>, Vec<_>) = args
            .values
            .into_iter()
            .partition(|value| is_legal(info, value));

        for value in &illegal {
            warn!(
                "Ignoring illegal value {} for {} ({})",
                value,
                info.name,
                info.vartype.as_str()
            );
        }

        Ok(Self {
            target: Arc::new(ParameterTarget::new(info.name.clone(), DEFAULT_PRECISION)),
            vartype: info.vartype,
            legal,
            illegal,
            alter_system: args.alter_system,
        })
    }

    pub fn illegal_values(&self) -> &[ParamValue] {
        &self.illegal
    }
}

impl ActionGenerator for CategoricalKnobGenerator {
    fn actions(&self) -> ActionStream<'_> {
        Box::new(self.legal.iter().map(move |value| {
            Ok(Action::set_parameter(
                Arc::clone(&self.target),
                Some(value.clone()),
                self.alter_system,
            ))
        }))
    }

    fn diagnostics(&self) -> Vec<String> {
        self.illegal
            .iter()
            .map(|value| {
                format!(
                    "illegal value {:?} for {} ({})",
                    value.to_string(),
                    self.target.name(),
                    self.vartype.as_str()
                )
            })
            .collect()
    }
}

fn is_legal(info: &ParameterInfo, value: &ParamValue) -> bool {
    match info.vartype {
        ParamType::Bool => match value {
            ParamValue::Bool(_) => true,
            ParamValue::Text(text) => BOOL_WORDS
                .iter()
                .any(|word| word.eq_ignore_ascii_case(text.trim())),
            _ => false,
        },
        // Booleans display as on/off, which is how enums spell them too.
        ParamType::Enum => {
            let text = value.to_string();
            info.enumvals
                .iter()
                .any(|legal| legal.eq_ignore_ascii_case(text.trim()))
        }
        ParamType::Integer | ParamType::Real => value.as_f64().is_some_and(|number| {
            (info.vartype == ParamType::Real || number.fract() == 0.0)
                && info.min_val.map_or(true, |min| number >= min)
                && info.max_val.map_or(true, |max| number <= max)
        }),
        ParamType::String => matches!(value, ParamValue::Text(_)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::fixtures::{self, parameter, ranged};
    use crate::facts::CatalogSnapshot;
    use rstest::rstest;

    fn facts() -> CatalogSnapshot {
        fixtures::shop()
            .with_parameter(ranged(
                "max_connections",
                ParamType::Integer,
                "100",
                1.0,
                262_143.0,
            ))
            .with_parameter(ranged(
                "geqo_threshold",
                ParamType::Integer,
                "12",
                2.0,
                20.0,
            ))
            .with_parameter(parameter("search_path", ParamType::String, "public"))
    }

    fn settings(generator: &dyn ActionGenerator) -> Vec<ParamValue> {
        generator
            .actions()
            .map(|item| match item.unwrap() {
                Action::SetParameter {
                    value: Some(value), ..
                } => value,
                other => panic!("unexpected action {other}"),
            })
            .collect()
    }

    fn ints(values: &[i64]) -> Vec<ParamValue> {
        values.iter().map(|v| ParamValue::Int(*v)).collect()
    }

    #[test]
    fn pct_sweep_scales_current_value() {
        let generator = NumericalKnobGenerator::new(
            &facts(),
            NumericalKnobArgs::new("max_connections", KnobMode::Pct).sweep(0.5, 2.0, 0.5),
        )
        .unwrap();
        assert_eq!(settings(&generator), ints(&[50, 100, 150, 200]));
    }

    #[rstest]
    #[case(KnobMode::Delta, 10.0, 30.0, 10.0, &[110, 120, 130])]
    #[case(KnobMode::Absolute, 1.0, 3.0, 1.0, &[1, 2, 3])]
    #[case(KnobMode::Pow2, 1.0, 3.0, 1.0, &[2, 4, 8])]
    fn other_modes(
        #[case] mode: KnobMode,
        #[case] min: f64,
        #[case] max: f64,
        #[case] interval: f64,
        #[case] expected: &[i64],
    ) {
        let generator = NumericalKnobGenerator::new(
            &facts(),
            NumericalKnobArgs::new("max_connections", mode).sweep(min, max, interval),
        )
        .unwrap();
        assert_eq!(settings(&generator), ints(expected));
    }

    #[test]
    fn real_parameters_round_to_precision() {
        let generator = NumericalKnobGenerator::new(
            &facts(),
            NumericalKnobArgs::new("random_page_cost", KnobMode::Pct).sweep(0.1, 0.3, 0.1),
        )
        .unwrap();
        assert_eq!(
            settings(&generator),
            vec![
                ParamValue::Float(0.4),
                ParamValue::Float(0.8),
                ParamValue::Float(1.2)
            ]
        );
    }

    #[test]
    fn default_sweep_includes_upper_bound() {
        let generator = NumericalKnobGenerator::new(
            &facts(),
            NumericalKnobArgs::new("random_page_cost", KnobMode::Pct),
        )
        .unwrap();
        let values = settings(&generator);
        assert_eq!(values.len(), 50);
        assert_eq!(values.last(), Some(&ParamValue::Float(20.0)));
    }

    #[test]
    fn out_of_range_candidate_ends_the_sweep() {
        let generator = NumericalKnobGenerator::new(
            &facts(),
            NumericalKnobArgs::new("geqo_threshold", KnobMode::Pct).sweep(1.0, 3.0, 0.5),
        )
        .unwrap();
        let items: Vec<_> = generator.actions().collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_ok());
        assert!(matches!(
            items[2],
            Err(GeneratorError::OutOfRange { value, .. }) if value == 24.0
        ));
    }

    #[test]
    fn candidate_past_the_limit_is_not_rounded_back_in() {
        let generator = NumericalKnobGenerator::new(
            &facts(),
            NumericalKnobArgs::new("geqo_threshold", KnobMode::Pct).sweep(1.7, 1.7, 1.0),
        )
        .unwrap();
        let items: Vec<_> = generator.actions().collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(GeneratorError::OutOfRange { value, max, .. })
                if (value - 20.4).abs() < 1e-9 && max == 20.0
        ));
    }

    #[test]
    fn real_candidate_past_the_limit_fails() {
        let facts = facts().with_parameter(ranged("seq_cost", ParamType::Real, "1", 0.0, 1.0));
        let generator = NumericalKnobGenerator::new(
            &facts,
            NumericalKnobArgs::new("seq_cost", KnobMode::Pct).sweep(1.0, 1.004, 0.004),
        )
        .unwrap();
        let items: Vec<_> = generator.actions().collect();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Ok(Action::SetParameter { value: Some(ParamValue::Float(v)), .. }) if v == 1.0));
        assert!(matches!(items[1], Err(GeneratorError::OutOfRange { .. })));
    }

    #[test]
    fn categorical_parameters_are_rejected() {
        let err = NumericalKnobGenerator::new(
            &facts(),
            NumericalKnobArgs::new("enable_seqscan", KnobMode::Pct),
        )
        .unwrap_err();
        assert!(matches!(err, GeneratorError::NotNumeric { .. }));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = NumericalKnobGenerator::new(
            &facts(),
            NumericalKnobArgs::new("work_mem", KnobMode::Pct).sweep(0.1, 1.0, 0.0),
        )
        .unwrap_err();
        assert!(matches!(err, GeneratorError::InvalidInterval { .. }));
    }

    #[test]
    fn numerical_args_accept_legacy_keys() {
        let args: NumericalKnobArgs =
            serde_yaml::from_str("knob_name: work_mem\nmode: POW2\nmin_val: 6\nmax_val: 10\ninterval: 1")
                .unwrap();
        assert_eq!(args.parameter, "work_mem");
        assert_eq!(args.mode, KnobMode::Pow2);
        assert_eq!(args.min_val, 6.0);
        assert_eq!(args.precision, DEFAULT_PRECISION);
    }

    fn categorical(parameter: &str, values: &str) -> CategoricalKnobGenerator {
        let args = CategoricalKnobArgs {
            parameter: parameter.to_string(),
            values: serde_yaml::from_str(values).unwrap(),
            alter_system: false,
        };
        CategoricalKnobGenerator::new(&facts(), args).unwrap()
    }

    #[test]
    fn boolean_words_and_values_are_legal() {
        let generator = categorical("enable_seqscan", "['off', true, 'on', false]");
        assert_eq!(generator.actions().count(), 4);
        assert!(generator.illegal_values().is_empty());
        assert!(generator.diagnostics().is_empty());
    }

    #[test]
    fn illegal_boolean_values_are_reported() {
        let generator = categorical("enable_seqscan", "['off', 'or', '??', true]");
        assert_eq!(
            settings(&generator),
            vec![ParamValue::Text("off".into()), ParamValue::Bool(true)]
        );
        assert_eq!(
            generator.illegal_values(),
            &[ParamValue::Text("or".into()), ParamValue::Text("??".into())]
        );
        assert_eq!(generator.diagnostics().len(), 2);
    }

    #[test]
    fn enum_values_match_case_insensitively() {
        let generator = categorical("wal_level", "[replica, LOGICAL, archive]");
        assert_eq!(generator.actions().count(), 2);
        assert_eq!(
            generator.illegal_values(),
            &[ParamValue::Text("archive".into())]
        );
    }

    #[test]
    fn numeric_values_respect_bounds() {
        let generator = categorical("work_mem", "[32, 128, '256', 1.5]");
        assert_eq!(
            settings(&generator),
            vec![ParamValue::Int(128), ParamValue::Text("256".into())]
        );
    }

    #[test]
    fn string_parameters_take_any_text() {
        let generator = categorical("search_path", "['public', '\"$user\", public']");
        assert_eq!(generator.actions().count(), 2);
    }

    #[test]
    fn unknown_parameter_aborts_construction() {
        let args = CategoricalKnobArgs {
            parameter: "enable_seq".into(),
            values: vec![ParamValue::Bool(true)],
            alter_system: true,
        };
        let err = CategoricalKnobGenerator::new(&facts(), args).unwrap_err();
        assert!(matches!(err, GeneratorError::Facts { .. }));
    }

    #[test]
    fn alter_system_is_carried_into_actions() {
        let args = CategoricalKnobArgs {
            parameter: "enable_seqscan".into(),
            values: vec![ParamValue::Bool(false)],
            alter_system: true,
        };
        let generator = CategoricalKnobGenerator::new(&facts(), args).unwrap();
        let sql: Vec<String> = generator
            .actions()
            .map(|a| a.unwrap().to_string())
            .collect();
        assert_eq!(sql, vec!["ALTER SYSTEM SET enable_seqscan TO 'off';"]);
    }
}
