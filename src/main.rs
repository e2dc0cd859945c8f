mod browser;
mod config;
mod error;
mod flagging;
mod frame;
mod marketplace;
mod notify;
mod orchestrator;
mod period;
mod qa;
mod report_api;
mod runner;
mod schema;
mod source;
mod warehouse;
mod workbook;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use config::Config;
use error::Error;
use log::error;
use period::ReportingPeriod;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch one source for a date range and save it as CSV.
    Fetch {
        #[arg(help = "Source name, e.g. 'campaign details' or 'DV360'")]
        source: String,

        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        start: NaiveDate,

        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        end: NaiveDate,

        /// Also load the fetched data into its warehouse table.
        #[arg(long)]
        insert: bool,
    },

    /// Run the post-load QA checks for a loaded date range.
    Qa {
        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        start: NaiveDate,

        #[arg(help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
        end: NaiveDate,
    },

    /// Build (and optionally mail) the weekly flagged report for a channel.
    Report {
        #[arg(help = "Channel: Social or Programmatic")]
        channel: String,

        #[arg(long, value_parser = validate_date)]
        start: Option<NaiveDate>,

        #[arg(long, value_parser = validate_date)]
        end: Option<NaiveDate>,

        /// Report on the week before the most recent full week.
        #[arg(long)]
        last_week: bool,

        /// Use Sunday..Saturday weeks instead of Monday..Sunday.
        #[arg(long)]
        sun_sat: bool,

        /// Email the workbook to the configured recipients.
        #[arg(long)]
        send: bool,
    },
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    let error_message = "Invalid date, expected YYYY-MM-DD";

    let parts = s
        .split("-")
        .map(|part| part.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error_message)?;

    match parts.as_slice() {
        &[year, month, day] if month <= 12 && day <= 31 => {
            Ok(
                NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .ok_or(error_message)?,
            )
        }
        _ => Err(error_message.to_string()),
    }
}

fn report_period(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    last_week: bool,
    sun_sat: bool,
) -> Result<ReportingPeriod, Error> {
    match (start, end) {
        (Some(begin), Some(end)) => ReportingPeriod::explicit(begin, end),
        (Some(d), None) | (None, Some(d)) => Err(Error::InvalidDate {
            date: d.to_string(),
        }),
        (None, None) => Ok(ReportingPeriod::derive(
            Local::now().date_naive(),
            last_week,
            sun_sat,
        )),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    let outcome = match &args.command {
        Command::Fetch {
            source,
            start,
            end,
            insert,
        } => runner::fetch_source(args.config, source, *start, *end, *insert).await,
        Command::Qa { start, end } => runner::run_qa(args.config, *start, *end).await,
        Command::Report {
            channel,
            start,
            end,
            last_week,
            sun_sat,
            send,
        } => match report_period(*start, *end, *last_week, *sun_sat) {
            Ok(period) => runner::run_weekly_report(args.config, channel, period, *send).await,
            Err(err) => Err(err),
        },
    };

    if let Err(err) = outcome {
        error!("command failed: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
