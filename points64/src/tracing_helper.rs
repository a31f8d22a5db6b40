use std::{num::NonZeroU8, panic};

use time::format_description::well_known::{
    iso8601::{self, EncodedConfig},
    Iso8601,
};
use tracing::error;
use tracing_subscriber::{
    fmt::time::LocalTime, prelude::__tracing_subscriber_SubscriberExt, EnvFilter, Layer,
};

const MY_CONFIG: EncodedConfig = iso8601::Config::DEFAULT
    .set_time_precision(iso8601::TimePrecision::Second {
        decimal_digits: NonZeroU8::new(3),
    })
    .encode();

pub fn init_tracing() {
    const WITH_FILE_PATH: bool = cfg!(debug_assertions);
    let layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_file(WITH_FILE_PATH)
        .with_line_number(WITH_FILE_PATH)
        .with_target(!WITH_FILE_PATH)
        .with_thread_ids(true)
        .with_timer(LocalTime::new(Iso8601::<MY_CONFIG>));
    let filter = if cfg!(debug_assertions) {
        EnvFilter::new(concat!(env!("CARGO_CRATE_NAME"), "=trace,points64_lib=trace"))
    } else {
        EnvFilter::new(concat!(env!("CARGO_CRATE_NAME"), "=info,points64_lib=info"))
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(layer.with_filter(filter)),
    )
    .unwrap();

    panic::set_hook(Box::new(|panic| error!("{}", panic)));
}
