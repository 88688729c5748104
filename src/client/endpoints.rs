//! The finite lookup-endpoint table keyed by catalog partition (spec §6.2).

use crate::model::HrnPartition;

/// Base path every lookup endpoint shares.
pub const LOOKUP_BASE_PATH: &str = "/lookup/v1";

/// The default lookup host for `partition`, before any
/// `lookup_endpoint_provider` override.
pub fn default_lookup_host(partition: HrnPartition) -> &'static str {
    match partition {
        HrnPartition::Here => "api-lookup.data.api.platform.here.com",
        HrnPartition::HereDev => "api-lookup.data.api.platform.sit.here.com",
        HrnPartition::HereCn => "api-lookup.data.api.platform.hereolp.cn",
        HrnPartition::HereCnDev => "api-lookup.data.api.platform.in.hereolp.cn",
    }
}

/// The full default lookup endpoint URL (scheme + host + base path) for
/// `partition`.
pub fn default_lookup_url(partition: HrnPartition) -> String {
    format!("https://{}{}", default_lookup_host(partition), LOOKUP_BASE_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_every_partition() {
        for p in [
            HrnPartition::Here,
            HrnPartition::HereDev,
            HrnPartition::HereCn,
            HrnPartition::HereCnDev,
        ] {
            assert!(default_lookup_url(p).starts_with("https://"));
            assert!(default_lookup_url(p).ends_with(LOOKUP_BASE_PATH));
        }
    }
}
