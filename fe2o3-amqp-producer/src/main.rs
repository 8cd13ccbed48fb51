use clap::Parser;

use fe2o3_amqp_producer::{
    config::{Args, Config},
    proactor, Driver, Producer,
};

fn main() {
    #[cfg(feature = "tracing")]
    {
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .finish();
        if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("{}", err);
        }
    }
    #[cfg(feature = "log")]
    env_logger::init();

    let config = match Config::try_from(Args::parse()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    let mut producer = Producer::from(&config);
    let mut driver = Driver::from(&config);
    let result = runtime.block_on(proactor::run(&mut driver, &mut producer));

    match result {
        Ok(()) => std::process::exit(producer.exit_code()),
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }
}
