#![no_main]

use capsched::config::SchedulerConfig;
use capsched::resource::ResourceTypeRegistry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = SchedulerConfig::from_toml_str(text) else {
        return;
    };
    if let Ok(registry) = ResourceTypeRegistry::initialize(config.resource_type_descriptors()) {
        let _res = config.validate(&registry.snapshot());
    }
});
