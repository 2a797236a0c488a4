use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use cylinder_fleet_api::{
    config, db,
    entities::OrderType,
    events,
    metrics, migrator,
    services::{
        loading::LoadItem, optimizer::OrderSequence, warehouse_inventory::BalanceDelta,
        weight::OrderLineInput,
    },
    AppState,
};
use serde::Serialize;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app_config = config::load_config().context("failed to load application config")?;
    config::init_tracing(app_config.log_level(), app_config.log_json);

    if let Commands::Migrate = cli.command {
        migrator::run_migration(app_config.database_url()).await?;
        println!("Migrations applied");
        return Ok(());
    }

    let (state, event_rx) = AppState::bootstrap(app_config)
        .await
        .context("failed to initialise fleet engine")?;
    tokio::spawn(events::process_events(event_rx));

    handle_command(&state, cli.command, cli.json).await
}

#[derive(Parser)]
#[command(name = "fleet-cli", about = "Operate the cylinder fleet engine")]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Estimate the weight of order lines
    Weight(WeightArgs),
    /// Capacity of one truck on a date
    Capacity(TruckDateArgs),
    /// Rank trucks for an order
    BestTruck(BestTruckArgs),
    /// Check a proposed order to truck allocation
    ValidateAllocation(ValidateAllocationArgs),
    /// Allocate an order and reserve its stock
    Allocate(AllocateArgs),
    /// Move an allocation from planned to loaded
    MarkLoaded(AllocationIdArgs),
    /// Cancel an allocation and release its reservations
    CancelAllocation(AllocationIdArgs),
    /// Mark an allocation delivered and settle the truck stock
    Deliver(AllocationIdArgs),
    /// Fleet schedule for a date
    Schedule(DateArgs),
    /// Plan a batch of orders onto the fleet
    Optimize(OptimizeArgs),
    /// Check a load against a truck's capacity
    ValidateLoad(ValidateLoadArgs),
    /// Load stock from a warehouse onto a truck
    Load(TransferArgs),
    /// Return stock from a truck to a warehouse
    Unload(TransferArgs),
    /// Truck inventory with totals
    Inventory(TruckArgs),
    /// Reserve truck stock
    Reserve(ReservationArgs),
    /// Release a truck reservation
    Release(ReservationArgs),
    /// Check truck stock availability
    Availability(AvailabilityArgs),
    /// Apply a signed movement to a warehouse balance
    AdjustWarehouse(AdjustWarehouseArgs),
    /// Print metrics in the Prometheus text format
    Metrics,
}

#[derive(Args)]
struct WeightArgs {
    /// Order line as PRODUCT_ID:QUANTITY; repeatable
    #[arg(long = "line", required = true, value_parser = parse_line)]
    lines: Vec<OrderLineInput>,
    #[arg(long, value_parser = parse_order_type)]
    order_type: Option<OrderType>,
}

#[derive(Args)]
struct DateArgs {
    #[arg(long)]
    date: NaiveDate,
}

#[derive(Args)]
struct TruckArgs {
    truck_id: Uuid,
}

#[derive(Args)]
struct TruckDateArgs {
    truck_id: Uuid,
    #[arg(long)]
    date: NaiveDate,
}

#[derive(Args)]
struct BestTruckArgs {
    order_id: Uuid,
    #[arg(long)]
    weight: f64,
    #[arg(long)]
    date: NaiveDate,
}

#[derive(Args)]
struct ValidateAllocationArgs {
    truck_id: Uuid,
    order_id: Uuid,
    #[arg(long)]
    weight: f64,
    #[arg(long)]
    date: NaiveDate,
}

#[derive(Args)]
struct AllocateArgs {
    order_id: Uuid,
    /// Truck to use; the best fit is chosen when omitted
    #[arg(long)]
    truck: Option<Uuid>,
    #[arg(long)]
    date: NaiveDate,
}

#[derive(Args)]
struct AllocationIdArgs {
    allocation_id: Uuid,
}

#[derive(Args)]
struct OptimizeArgs {
    #[arg(required = true)]
    order_ids: Vec<Uuid>,
    #[arg(long)]
    date: NaiveDate,
    /// arrival, weight_desc or priority
    #[arg(long, value_parser = parse_sequence)]
    sequence: Option<OrderSequence>,
}

#[derive(Args)]
struct ValidateLoadArgs {
    truck_id: Uuid,
    /// Item as PRODUCT_ID:FULL:EMPTY; repeatable
    #[arg(long = "item", required = true, value_parser = parse_item)]
    items: Vec<LoadItem>,
}

#[derive(Args)]
struct TransferArgs {
    truck_id: Uuid,
    warehouse_id: Uuid,
    /// Item as PRODUCT_ID:FULL:EMPTY; repeatable
    #[arg(long = "item", required = true, value_parser = parse_item)]
    items: Vec<LoadItem>,
}

#[derive(Args)]
struct ReservationArgs {
    truck_id: Uuid,
    product_id: Uuid,
    quantity: i32,
    #[arg(long)]
    order: Option<Uuid>,
}

#[derive(Args)]
struct AvailabilityArgs {
    truck_id: Uuid,
    product_id: Uuid,
    quantity: i32,
}

#[derive(Args)]
struct AdjustWarehouseArgs {
    warehouse_id: Uuid,
    product_id: Uuid,
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    full: i32,
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    empty: i32,
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    reserved: i32,
}

fn parse_line(raw: &str) -> Result<OrderLineInput, String> {
    let (product, quantity) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected PRODUCT_ID:QUANTITY, got `{raw}`"))?;
    Ok(OrderLineInput {
        product_id: product.parse().map_err(|e| format!("bad product id: {e}"))?,
        quantity: quantity.parse().map_err(|e| format!("bad quantity: {e}"))?,
    })
}

fn parse_item(raw: &str) -> Result<LoadItem, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    let [product, full, empty] = parts.as_slice() else {
        return Err(format!("expected PRODUCT_ID:FULL:EMPTY, got `{raw}`"));
    };
    Ok(LoadItem {
        product_id: product.parse().map_err(|e| format!("bad product id: {e}"))?,
        qty_full: full.parse().map_err(|e| format!("bad full quantity: {e}"))?,
        qty_empty: empty.parse().map_err(|e| format!("bad empty quantity: {e}"))?,
    })
}

fn parse_order_type(raw: &str) -> Result<OrderType, String> {
    OrderType::from_str(raw).ok_or_else(|| format!("unknown order type `{raw}`"))
}

fn parse_sequence(raw: &str) -> Result<OrderSequence, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("unknown order sequence `{raw}`"))
}

fn render<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn print_messages(label: &str, messages: &[String]) {
    for message in messages {
        println!("  {label}: {message}");
    }
}

async fn handle_command(state: &AppState, command: Commands, json: bool) -> Result<()> {
    let services = &state.services;

    match command {
        Commands::Migrate => {
            db::run_migrations(&state.db).await?;
            println!("Migrations applied");
            Ok(())
        }
        Commands::Weight(args) => {
            let weight = services
                .weights
                .calculate_order_weight(&args.lines, args.order_type)
                .await?;
            render(json, &weight, |w| {
                println!("Total weight: {:.1} kg", w.total_weight_kg);
                for line in &w.line_estimates {
                    println!(
                        "  {} x{} = {:.1} kg",
                        line.product_id, line.quantity, line.estimated_weight_kg
                    );
                }
                for skipped in &w.skipped_product_ids {
                    println!("  skipped unknown product {skipped}");
                }
            })
        }
        Commands::Capacity(args) => {
            let cap = services
                .capacity
                .calculate_capacity(args.truck_id, args.date)
                .await?;
            render(json, &cap, |c| {
                println!(
                    "{}: {:.1} / {:.1} kg allocated ({:.1}%), {} order(s){}",
                    c.fleet_number,
                    c.allocated_weight_kg,
                    c.total_capacity_kg,
                    c.utilization_percentage,
                    c.orders_count,
                    if c.is_overallocated { ", OVERALLOCATED" } else { "" }
                );
            })
        }
        Commands::BestTruck(args) => {
            let result = services
                .allocation
                .find_best_allocation(args.order_id, args.weight, args.date)
                .await?;
            render(json, &result, |r| {
                match &r.best_truck {
                    Some(best) => println!(
                        "Best truck: {} ({:.1} kg left after)",
                        best.fleet_number, best.remaining_after_kg
                    ),
                    None => println!("No truck can take {:.1} kg", r.order_weight_kg),
                }
                println!(
                    "{} of {} truck(s) feasible",
                    r.recommendations.len(),
                    r.evaluated.len()
                );
            })
        }
        Commands::ValidateAllocation(args) => {
            let validation = services
                .allocation
                .validate_allocation(args.truck_id, args.order_id, args.weight, args.date)
                .await?;
            render(json, &validation, |v| {
                println!("Valid: {}", v.is_valid);
                print_messages("error", &v.errors);
                print_messages("warning", &v.warnings);
            })
        }
        Commands::Allocate(args) => {
            let result = services
                .allocation
                .allocate_order(args.order_id, args.truck, args.date)
                .await?;
            render(json, &result, |r| {
                println!(
                    "Allocated order {} to truck {} (stop {}), {:.1} kg, {} reservation(s)",
                    r.allocation.order_id,
                    r.allocation.truck_id,
                    r.allocation.stop_sequence.unwrap_or_default(),
                    r.allocation.estimated_weight_kg,
                    r.reservations.len()
                );
                print_messages("warning", &r.warnings);
            })
        }
        Commands::MarkLoaded(args) => {
            let allocation = services.allocation.mark_loaded(args.allocation_id).await?;
            render(json, &allocation, |a| println!("Allocation {} is {}", a.id, a.status))
        }
        Commands::CancelAllocation(args) => {
            let allocation = services
                .allocation
                .cancel_allocation(args.allocation_id)
                .await?;
            render(json, &allocation, |a| println!("Allocation {} is {}", a.id, a.status))
        }
        Commands::Deliver(args) => {
            let outcome = services
                .allocation
                .complete_delivery(args.allocation_id)
                .await?;
            render(json, &outcome, |o| {
                println!(
                    "Allocation {} delivered, {} line(s) settled",
                    o.allocation.id,
                    o.adjusted_lines.len()
                );
                print_messages("warning", &o.warnings);
            })
        }
        Commands::Schedule(args) => {
            let schedule = services.schedule.generate_schedule(args.date).await?;
            render(json, &schedule, |s| {
                for truck in &s.schedules {
                    println!(
                        "{} [{}] {} stop(s), {:.1}% used{}{}",
                        truck.truck.fleet_number,
                        truck.status,
                        truck.allocations.len(),
                        truck.capacity.utilization_percentage,
                        if truck.maintenance_due { ", maintenance due" } else { "" },
                        if truck.fuel_sufficient { "" } else { ", fuel short" }
                    );
                }
                let f = &s.fleet_utilization;
                println!(
                    "Fleet: {}/{} active, {:.1}/{:.1} kg ({:.1}%), {} overallocated, {} due for maintenance",
                    f.active_trucks,
                    f.total_trucks,
                    f.allocated_capacity_kg,
                    f.total_capacity_kg,
                    f.overall_utilization,
                    f.overallocated_trucks,
                    f.maintenance_due_trucks
                );
            })
        }
        Commands::Optimize(args) => {
            let mut optimizer = (*services.optimizer).clone();
            if let Some(sequence) = args.sequence {
                optimizer = optimizer.with_sequence(sequence);
            }
            let plan = optimizer
                .optimize_allocations(&args.order_ids, args.date)
                .await?;
            render(json, &plan, |p| {
                for a in &p.optimized_allocations {
                    println!(
                        "  {} -> {} ({:.1} kg, confidence {:.2})",
                        a.order_id, a.fleet_number, a.estimated_weight_kg, a.confidence
                    );
                }
                for order_id in &p.unallocated_orders {
                    println!("  {order_id} unallocated");
                }
                let s = &p.optimization_summary;
                println!(
                    "{}/{} allocated, fleet utilization {:.1}%",
                    s.allocated_orders, s.total_orders, s.fleet_utilization
                );
            })
        }
        Commands::ValidateLoad(args) => {
            let validation = services
                .loading
                .validate_loading_capacity(args.truck_id, &args.items)
                .await?;
            render(json, &validation, |v| {
                let c = &v.capacity_check;
                println!(
                    "Valid: {} ({} / {} cylinders, {:.1} / {:.1} kg)",
                    v.is_valid,
                    c.total_cylinders_after,
                    c.capacity_cylinders,
                    c.total_weight_after_kg,
                    c.capacity_kg
                );
                print_messages("error", &v.errors);
                print_messages("warning", &v.warnings);
            })
        }
        Commands::Load(args) => {
            let result = services
                .transfers
                .load_inventory(args.truck_id, args.warehouse_id, &args.items)
                .await?;
            render(json, &result, |r| {
                println!(
                    "Loading {}: {} item(s) transferred, verified: {}",
                    r.loading_id, r.items_transferred, r.verification.verified
                );
                print_messages("warning", &r.warnings);
            })
        }
        Commands::Unload(args) => {
            let result = services
                .transfers
                .unload_inventory(args.truck_id, args.warehouse_id, &args.items)
                .await?;
            render(json, &result, |r| {
                println!(
                    "{} item(s) unloaded, verified: {}",
                    r.items_transferred, r.verification.verified
                );
            })
        }
        Commands::Inventory(args) => {
            let view = services.transfers.get_inventory(args.truck_id).await?;
            render(json, &view, |v| {
                println!("{} [{}]", v.truck.fleet_number, v.status);
                for line in &v.inventory {
                    println!(
                        "  {}: {} full ({} reserved), {} empty",
                        line.product_id, line.qty_full, line.qty_reserved, line.qty_empty
                    );
                }
                let s = &v.summary;
                println!(
                    "Total: {} full, {} empty, {} available, {:.1} kg, {:.1}% of slots",
                    s.total_full,
                    s.total_empty,
                    s.total_available,
                    s.total_weight_kg,
                    s.cylinder_utilization
                );
            })
        }
        Commands::Reserve(args) => {
            let outcome = services
                .reservations
                .reserve_inventory(args.truck_id, args.product_id, args.quantity, args.order)
                .await?;
            render(json, &outcome, |o| {
                println!(
                    "Reserved: {} total, {} still available",
                    o.quantity_reserved, o.available_remaining
                );
            })
        }
        Commands::Release(args) => {
            let outcome = services
                .reservations
                .release_reservation(args.truck_id, args.product_id, args.quantity, args.order)
                .await?;
            render(json, &outcome, |o| {
                println!(
                    "Reserved: {} total, {} available",
                    o.quantity_reserved, o.available_remaining
                );
            })
        }
        Commands::Availability(args) => {
            let check = services
                .reservations
                .check_availability(args.truck_id, args.product_id, args.quantity)
                .await?;
            render(json, &check, |c| {
                println!(
                    "{}: {} available, {} reserved",
                    if c.available { "available" } else { "unavailable" },
                    c.available_qty,
                    c.reserved_qty
                );
            })
        }
        Commands::AdjustWarehouse(args) => {
            let delta = BalanceDelta {
                full: args.full,
                empty: args.empty,
                reserved: args.reserved,
            };
            let outcome = services
                .warehouse_inventory
                .apply_movement(args.warehouse_id, args.product_id, delta)
                .await?;
            render(json, &outcome.record, |b| {
                println!(
                    "Balance v{}: {} full, {} empty, {} reserved ({} attempt(s))",
                    b.version, b.qty_full, b.qty_empty, b.qty_reserved, outcome.attempts
                );
            })
        }
        Commands::Metrics => {
            print!("{}", metrics::gather());
            Ok(())
        }
    }
}
