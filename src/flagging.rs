use crate::error::Error;
use crate::frame::Frame;
use crate::period::ReportingPeriod;
use crate::warehouse::{ProcParam, Warehouse};
use serde_json::Value;
use std::cmp::Ordering;

const PLACEMENTS_PROC: &str = "Get_Current_Placements";
const CAMPAIGNS_PROC: &str = "Summarize_Week_Campaigns";
const TACTIC_SITE_PROC: &str = "Summarize_Week_Tactic_Site_Channel";

const SOCIAL_BENCHMARK: f64 = 2.0;
const PROGRAMMATIC_BENCHMARK: f64 = 2.0;

/// Bottom-sheet row count never exceeds this.
const BOTTOM_SHEET_CAP: usize = 100;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Social,
    Programmatic,
}

impl Channel {
    pub fn parse(name: &str) -> Result<Self, Error> {
        match name.to_lowercase().as_str() {
            "social" => Ok(Channel::Social),
            "programmatic" => Ok(Channel::Programmatic),
            _ => Err(Error::UnknownChannel {
                channel: name.to_string(),
            }),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Channel::Social => "Social",
            Channel::Programmatic => "Programmatic",
        }
    }

    fn benchmark(&self) -> f64 {
        match self {
            Channel::Social => SOCIAL_BENCHMARK,
            Channel::Programmatic => PROGRAMMATIC_BENCHMARK,
        }
    }
}

/// One placement row as returned by the current-placements procedure.
#[derive(Debug, Clone)]
pub struct Placement {
    pub placement_name: String,
    pub prisma_id: String,
    pub site: String,
    pub campaign_name: String,
    pub campaign_id: String,
    pub channel: String,
    pub weekly_adj_revenue: f64,
    pub weekly_spend: f64,
    pub overall_adj_revenue: f64,
    pub overall_spend: f64,
}

/// Placement enriched with the derived flagging fields. ROI is undefined
/// (not zero) where the week had no spend.
#[derive(Debug, Clone)]
pub struct FlaggedPlacement {
    pub placement: Placement,
    pub flag: String,
    pub roi: Option<f64>,
    pub pct_spend: f64,
    pub overall_roi: Option<f64>,
    pub above_median_spend: bool,
}

impl FlaggedPlacement {
    fn has_spend(&self) -> bool {
        self.placement.weekly_spend != 0.0
    }
}

fn cell_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn cell_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn column_index(frame: &Frame, name: &str) -> Result<usize, Error> {
    frame
        .columns()
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| Error::SchemaMismatch {
            column: name.to_string(),
            known_columns: frame.columns().to_vec(),
        })
}

/// Reads the current-placements result set into typed rows. A missing
/// expected column is surfaced as a schema mismatch against the result set.
pub fn parse_placements(frame: &Frame) -> Result<Vec<Placement>, Error> {
    let placement_name = column_index(frame, "Placement Name")?;
    let prisma_id = column_index(frame, "Prisma ID")?;
    let site = column_index(frame, "PLA_Site")?;
    let campaign_name = column_index(frame, "Campaign Name")?;
    let campaign_id = column_index(frame, "Campaign ID")?;
    let channel = column_index(frame, "Channel")?;
    let weekly_adj_revenue = column_index(frame, "Weekly Adj. Revenue")?;
    let weekly_spend = column_index(frame, "Weekly Spend")?;
    let overall_adj_revenue = column_index(frame, "Overall Adj. Revenue")?;
    let overall_spend = column_index(frame, "Overall Spend")?;

    Ok(frame
        .rows()
        .iter()
        .map(|row| Placement {
            placement_name: cell_string(&row[placement_name]),
            prisma_id: cell_string(&row[prisma_id]),
            site: cell_string(&row[site]),
            campaign_name: cell_string(&row[campaign_name]),
            campaign_id: cell_string(&row[campaign_id]),
            channel: cell_string(&row[channel]),
            weekly_adj_revenue: cell_f64(&row[weekly_adj_revenue]),
            weekly_spend: cell_f64(&row[weekly_spend]),
            overall_adj_revenue: cell_f64(&row[overall_adj_revenue]),
            overall_spend: cell_f64(&row[overall_spend]),
        })
        .collect())
}

fn ratio_roi(revenue: f64, spend: f64) -> Option<f64> {
    if spend == 0.0 {
        None
    } else {
        Some((revenue - spend) / spend)
    }
}

fn median(values: &mut Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Derives % spend, ROI and the benchmark flags for a channel's placements.
/// A week with no spend always flags as no-spend, regardless of channel.
pub fn flag_placements(placements: Vec<Placement>, channel: Channel) -> Vec<FlaggedPlacement> {
    let total_spend: f64 = placements.iter().map(|p| p.weekly_spend).sum();
    let mut spends: Vec<f64> = placements.iter().map(|p| p.weekly_spend).collect();
    let median_spend = median(&mut spends);
    let benchmark = channel.benchmark();

    placements
        .into_iter()
        .map(|placement| {
            let roi = ratio_roi(placement.weekly_adj_revenue, placement.weekly_spend);
            let overall_roi =
                ratio_roi(placement.overall_adj_revenue, placement.overall_spend);
            let pct_spend = if total_spend == 0.0 {
                0.0
            } else {
                100.0 * placement.weekly_spend / total_spend
            };

            let flag = match roi {
                None => "No spend for this week".to_string(),
                Some(r) if placement.channel == channel.label() && r < benchmark => {
                    format!("{} ROI under benchmark", channel.label())
                }
                Some(r) if placement.channel == channel.label() && r >= benchmark => {
                    format!("{} ROI exceeds benchmark", channel.label())
                }
                Some(_) => String::new(),
            };

            let above_median_spend =
                placement.weekly_spend != 0.0 && placement.weekly_spend > median_spend;

            FlaggedPlacement {
                placement,
                flag,
                roi,
                pct_spend,
                overall_roi,
                above_median_spend,
            }
        })
        .collect()
}

fn opt_value(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

/// Fixed presentation column order for the flagged sheets.
fn flagged_to_frame(rows: &[&FlaggedPlacement]) -> Frame {
    let columns = [
        "Flag",
        "ROI",
        "% Spend",
        "Placement Name",
        "Prisma ID",
        "PLA_Site",
        "Campaign Name",
        "Campaign ID",
        "Channel",
        "Weekly Adj. Revenue",
        "Weekly Spend",
        "Overall Adj. Revenue",
        "Overall Spend",
        "Overall ROI",
        "Above median spend",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();

    let cells = rows
        .iter()
        .map(|r| {
            vec![
                Value::from(r.flag.clone()),
                opt_value(r.roi),
                Value::from(r.pct_spend),
                Value::from(r.placement.placement_name.clone()),
                Value::from(r.placement.prisma_id.clone()),
                Value::from(r.placement.site.clone()),
                Value::from(r.placement.campaign_name.clone()),
                Value::from(r.placement.campaign_id.clone()),
                Value::from(r.placement.channel.clone()),
                Value::from(r.placement.weekly_adj_revenue),
                Value::from(r.placement.weekly_spend),
                Value::from(r.placement.overall_adj_revenue),
                Value::from(r.placement.overall_spend),
                opt_value(r.overall_roi),
                Value::from(r.above_median_spend),
            ]
        })
        .collect();

    Frame::new(columns, cells)
}

fn cmp_roi(a: Option<f64>, b: Option<f64>) -> Ordering {
    // Undefined ROI sorts after every defined value.
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// The named sheets of one channel's trigger workbook, in write order.
pub struct ReportSheets {
    pub channel: Channel,
    pub sheets: Vec<(String, Frame)>,
}

/// Assembles the weekly flagged report for one channel from warehouse query
/// results.
pub struct ChannelReportBuilder<'a, W: Warehouse + ?Sized> {
    warehouse: &'a W,
    channel: Channel,
    period: ReportingPeriod,
}

impl<'a, W: Warehouse + ?Sized> ChannelReportBuilder<'a, W> {
    pub fn new(warehouse: &'a W, channel: Channel, period: ReportingPeriod) -> Self {
        ChannelReportBuilder {
            warehouse,
            channel,
            period,
        }
    }

    fn summary_params(&self) -> Vec<(String, ProcParam)> {
        let previous = self.period.previous();
        vec![
            (
                "channel".to_string(),
                ProcParam::Str(self.channel.label().to_string()),
            ),
            (
                "startDate1".to_string(),
                ProcParam::Str(previous.begin.format(DATE_FORMAT).to_string()),
            ),
            (
                "endDate1".to_string(),
                ProcParam::Str(previous.end.format(DATE_FORMAT).to_string()),
            ),
            (
                "startDate2".to_string(),
                ProcParam::Str(self.period.begin.format(DATE_FORMAT).to_string()),
            ),
            (
                "endDate2".to_string(),
                ProcParam::Str(self.period.end.format(DATE_FORMAT).to_string()),
            ),
        ]
    }

    async fn current_placements(&self) -> Result<Vec<Placement>, Error> {
        let params = vec![
            (
                "startDate".to_string(),
                ProcParam::Str(self.period.begin.format(DATE_FORMAT).to_string()),
            ),
            (
                "endDate".to_string(),
                ProcParam::Str(self.period.end.format(DATE_FORMAT).to_string()),
            ),
            (
                "channel".to_string(),
                ProcParam::Str(self.channel.label().to_string()),
            ),
        ];
        let frame = self
            .warehouse
            .execute_procedure(PLACEMENTS_PROC, &params)
            .await?;
        parse_placements(&frame)
    }

    pub async fn build(&self) -> Result<ReportSheets, Error> {
        let placements = self.current_placements().await?;
        let mut flagged = flag_placements(placements, self.channel);
        // Ranked best-first for the top/bottom cuts.
        flagged.sort_by(|a, b| cmp_roi(b.roi, a.roi));

        let with_spend: Vec<&FlaggedPlacement> =
            flagged.iter().filter(|r| r.has_spend()).collect();

        let n_below = with_spend
            .iter()
            .filter(|r| r.roi.is_some_and(|roi| roi < self.channel.benchmark()))
            .count()
            .min(BOTTOM_SHEET_CAP);

        let movers: Vec<&FlaggedPlacement> = with_spend
            .iter()
            .copied()
            .filter(|r| r.above_median_spend)
            .collect();

        let bottom_start = movers.len().saturating_sub(n_below);
        let bottom: Vec<&FlaggedPlacement> = movers[bottom_start..].to_vec();
        let top: Vec<&FlaggedPlacement> = movers.iter().copied().take(5).collect();

        // The channel sheet lists spend-bearing rows worst-first.
        let mut channel_rows = with_spend.clone();
        channel_rows.sort_by(|a, b| {
            cmp_roi(a.roi, b.roi).then(
                a.pct_spend
                    .partial_cmp(&b.pct_spend)
                    .unwrap_or(Ordering::Equal),
            )
        });

        let campaign_summary = self
            .warehouse
            .execute_procedure(CAMPAIGNS_PROC, &self.summary_params())
            .await?;
        let tactic_site = self
            .warehouse
            .execute_procedure(TACTIC_SITE_PROC, &self.summary_params())
            .await?;

        let label = self.channel.label();
        Ok(ReportSheets {
            channel: self.channel,
            sheets: vec![
                ("Campaign Summary".to_string(), campaign_summary),
                ("Tactic x Site".to_string(), tactic_site),
                (label.to_string(), flagged_to_frame(&channel_rows)),
                (format!("{label} Top 5"), flagged_to_frame(&top)),
                (format!("{label} Bottom {n_below}"), flagged_to_frame(&bottom)),
            ],
        })
    }
}
