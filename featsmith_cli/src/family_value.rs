use clap::ValueEnum;

use featsmith_rs::FeatureFamily;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum FamilyValue {
    Ohlcv,
    Stats,
    Relational,
    Nonlinear,
}

impl FamilyValue {
    pub fn to_family(self) -> FeatureFamily {
        match self {
            FamilyValue::Ohlcv => FeatureFamily::Ohlcv,
            FamilyValue::Stats => FeatureFamily::Stats,
            FamilyValue::Relational => FeatureFamily::Relational,
            FamilyValue::Nonlinear => FeatureFamily::Nonlinear,
        }
    }
}
