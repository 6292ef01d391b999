//! Integration tests for the full fulfillment pipeline.
//!
//! Tests: Request → Calculator → Validator → Committer → InMemoryFulfillmentStore
//!
//! Verifies:
//! - Stock is conserved and never goes negative
//! - Rejected and failed orders leave no trace
//! - Batch outcomes are isolated per order and stay in submission order
//! - Concurrent orders never over-consume a contended ingredient
//! - Orders already running when a batch deadline passes still land whole

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tokio::sync::Semaphore;

    use cafeflow_core::{IngredientId, MenuItemId, OrderId};
    use cafeflow_inventory::{Ingredient, InventoryTransaction, TransactionType};
    use cafeflow_menu::{MenuItem, Recipe, RecipeLine};
    use cafeflow_orders::{
        CreateOrderItem, CreateOrderRequest, Order, OrderItem, OrderStatus, OrderStatusHistory,
        UpdateOrderRequest,
    };

    use crate::config::FulfillmentConfig;
    use crate::fulfillment::{DeletePolicy, FulfillmentError, OrderOutcome, OrderService};
    use crate::store::in_memory::InMemoryUnit;
    use crate::store::{
        FailPoint, FulfillmentStore, InMemoryFulfillmentStore, InventoryLedger, OrderReader,
        RecipeIndex, StoreError,
    };

    type Service = OrderService<InMemoryFulfillmentStore>;

    struct Cafe {
        store: Arc<InMemoryFulfillmentStore>,
        service: Arc<Service>,
        milk: IngredientId,
        espresso: IngredientId,
        latte: MenuItemId,
        americano: MenuItemId,
        doppio: MenuItemId,
        steamed_milk: MenuItemId,
    }

    async fn add_ingredient(
        store: &InMemoryFulfillmentStore,
        name: &str,
        quantity: Decimal,
        unit: &str,
        reorder_point: Decimal,
    ) -> IngredientId {
        let ingredient = Ingredient::new(IngredientId::new(), name, quantity, unit)
            .unwrap()
            .with_reorder_point(reorder_point);
        let id = ingredient.id_typed();
        store.add_ingredient(ingredient).await;
        id
    }

    async fn add_menu_item(
        store: &InMemoryFulfillmentStore,
        name: &str,
        price: Decimal,
        lines: &[(IngredientId, Decimal, &str)],
    ) -> MenuItemId {
        let id = MenuItemId::new();
        let recipe = Recipe::new(
            id,
            lines
                .iter()
                .map(|(ingredient_id, quantity, unit)| RecipeLine {
                    menu_item_id: id,
                    ingredient_id: *ingredient_id,
                    quantity: *quantity,
                    unit: unit.to_string(),
                })
                .collect(),
        )
        .unwrap();
        store
            .add_menu_item(MenuItem::new(id, name, price).unwrap(), recipe)
            .await;
        id
    }

    async fn setup_with(milk_ml: Decimal, espresso_shots: Decimal) -> Cafe {
        let store = Arc::new(InMemoryFulfillmentStore::new());
        let milk = add_ingredient(&store, "Milk", milk_ml, "ml", dec!(0)).await;
        let espresso = add_ingredient(&store, "Espresso", espresso_shots, "shot", dec!(0)).await;

        let latte = add_menu_item(
            &store,
            "Latte",
            dec!(4.50),
            &[(espresso, dec!(1), "shot"), (milk, dec!(200), "ml")],
        )
        .await;
        let americano = add_menu_item(&store, "Americano", dec!(3.00), &[(espresso, dec!(1), "shot")]).await;
        let doppio = add_menu_item(&store, "Doppio", dec!(3.50), &[(espresso, dec!(2), "shot")]).await;
        let steamed_milk = add_menu_item(&store, "Steamed milk", dec!(2.00), &[(milk, dec!(6), "ml")]).await;

        Cafe {
            service: Arc::new(OrderService::new(Arc::clone(&store))),
            store,
            milk,
            espresso,
            latte,
            americano,
            doppio,
            steamed_milk,
        }
    }

    async fn setup() -> Cafe {
        setup_with(dec!(1000), dec!(10)).await
    }

    fn test_order(customer: &str, items: &[(MenuItemId, u32)]) -> CreateOrderRequest {
        CreateOrderRequest {
            customer_name: customer.to_string(),
            special_instructions: None,
            items: items
                .iter()
                .map(|(menu_item_id, quantity)| CreateOrderItem {
                    menu_item_id: *menu_item_id,
                    quantity: *quantity,
                    customizations: None,
                })
                .collect(),
        }
    }

    /// In-memory store whose units of work wait for the test to open a gate.
    /// Every unit that starts waiting adds one permit to `waiting`.
    struct GatedStore {
        inner: InMemoryFulfillmentStore,
        waiting: Arc<Semaphore>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl RecipeIndex for GatedStore {
        async fn recipe(&self, menu_item_id: MenuItemId) -> Result<Recipe, StoreError> {
            self.inner.recipe(menu_item_id).await
        }
    }

    #[async_trait]
    impl InventoryLedger for GatedStore {
        async fn ingredient(&self, ingredient_id: IngredientId) -> Result<Ingredient, StoreError> {
            self.inner.ingredient(ingredient_id).await
        }

        async fn transactions(
            &self,
            ingredient_id: IngredientId,
        ) -> Result<Vec<InventoryTransaction>, StoreError> {
            self.inner.transactions(ingredient_id).await
        }
    }

    #[async_trait]
    impl OrderReader for GatedStore {
        async fn order(&self, order_id: OrderId) -> Result<Order, StoreError> {
            self.inner.order(order_id).await
        }

        async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
            self.inner.order_items(order_id).await
        }

        async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
            self.inner.list_orders().await
        }

        async fn status_history(&self, order_id: OrderId) -> Result<Vec<OrderStatusHistory>, StoreError> {
            self.inner.status_history(order_id).await
        }

        async fn all_status_history(&self) -> Result<Vec<OrderStatusHistory>, StoreError> {
            self.inner.all_status_history().await
        }
    }

    #[async_trait]
    impl FulfillmentStore for GatedStore {
        type Unit = InMemoryUnit;

        async fn begin(&self) -> Result<Self::Unit, StoreError> {
            self.waiting.add_permits(1);
            self.gate
                .acquire()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .forget();
            self.inner.begin().await
        }
    }

    async fn stock(cafe: &Cafe, ingredient_id: IngredientId) -> Decimal {
        cafe.store.ingredient(ingredient_id).await.unwrap().quantity()
    }

    async fn ledger_total(cafe: &Cafe, ingredient_id: IngredientId) -> Decimal {
        cafe.store
            .transactions(ingredient_id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.quantity_change)
            .sum()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_order_prices_persists_and_deducts() {
        let cafe = setup().await;

        let mut request = test_order("Ada", &[(cafe.latte, 2)]);
        request.items[0].customizations = Some(json!({"milk": "oat"}));
        let receipt = cafe.service.create_order(request).await.unwrap();

        assert_eq!(receipt.order.total(), dec!(9.00));
        assert_eq!(receipt.order.status(), OrderStatus::Pending);
        assert_eq!(receipt.order.special_instructions(), &json!({}));
        assert_eq!(receipt.items.len(), 1);
        assert_eq!(receipt.items[0].price_at_time, dec!(4.50));
        assert_eq!(receipt.items[0].customizations, json!({"milk": "oat"}));
        assert_eq!(receipt.deductions.len(), 2);

        assert_eq!(stock(&cafe, cafe.milk).await, dec!(600));
        assert_eq!(stock(&cafe, cafe.espresso).await, dec!(8));

        let details = cafe.service.get_order(receipt.order.id_typed()).await.unwrap();
        assert_eq!(details.order, receipt.order);
        assert_eq!(details.items, receipt.items);

        let milk_rows = cafe.service.ingredient_transactions(cafe.milk).await.unwrap();
        assert_eq!(milk_rows.len(), 1);
        assert_eq!(milk_rows[0].quantity_change, dec!(-400));
        assert_eq!(milk_rows[0].transaction_type, TransactionType::Deduction);
        assert_eq!(milk_rows[0].reason, format!("Order {}", receipt.order.id_typed()));
        assert_eq!(milk_rows[0].order_id, Some(receipt.order.id_typed()));

        // Creation writes no history row.
        assert!(cafe
            .service
            .status_history(receipt.order.id_typed())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stock_is_conserved_across_orders() {
        let cafe = setup().await;
        let before_milk = stock(&cafe, cafe.milk).await;
        let before_espresso = stock(&cafe, cafe.espresso).await;

        for (customer, item, qty) in [
            ("Ada", cafe.latte, 1),
            ("Grace", cafe.americano, 3),
            ("Linus", cafe.steamed_milk, 5),
            ("Barbara", cafe.doppio, 2),
        ] {
            cafe.service
                .create_order(test_order(customer, &[(item, qty)]))
                .await
                .unwrap();
        }

        // Over-ask on espresso: 10 - 1 - 3 - 4 = 2 left.
        let err = cafe
            .service
            .create_order(test_order("Ken", &[(cafe.doppio, 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::InsufficientStock(_)));

        for (id, before) in [(cafe.milk, before_milk), (cafe.espresso, before_espresso)] {
            let now = stock(&cafe, id).await;
            assert!(now >= Decimal::ZERO);
            assert_eq!(before + ledger_total(&cafe, id).await, now);
        }
        assert_eq!(stock(&cafe, cafe.espresso).await, dec!(2));
        assert_eq!(stock(&cafe, cafe.milk).await, dec!(770));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rejected_order_leaves_no_trace() {
        let cafe = setup_with(dec!(300), dec!(10)).await;

        let err = cafe
            .service
            .create_order(test_order("Ada", &[(cafe.latte, 2)]))
            .await
            .unwrap_err();

        match &err {
            FulfillmentError::InsufficientStock(shortfalls) => {
                assert_eq!(shortfalls.len(), 1);
                assert_eq!(shortfalls[0].name, "Milk");
                assert_eq!(shortfalls[0].required, dec!(400));
                assert_eq!(shortfalls[0].available, dec!(300));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "insufficient inventory: Milk (need 400 ml, have 300 ml)"
        );

        assert_eq!(stock(&cafe, cafe.milk).await, dec!(300));
        assert_eq!(stock(&cafe, cafe.espresso).await, dec!(10));
        assert!(cafe.store.transactions(cafe.milk).await.unwrap().is_empty());
        assert!(cafe.store.transactions(cafe.espresso).await.unwrap().is_empty());
        assert!(cafe.service.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_midway_rolls_back_everything() {
        let cafe = setup().await;

        for point in [
            FailPoint::PriceLookup,
            FailPoint::InsertOrder,
            FailPoint::RecordTransaction,
            FailPoint::Commit,
        ] {
            cafe.store.fail_next(point);
            let err = cafe
                .service
                .create_order(test_order("Ada", &[(cafe.latte, 1)]))
                .await
                .unwrap_err();
            match err {
                FulfillmentError::Persistence(msg) => assert!(msg.contains("injected"), "{point:?}: {msg}"),
                other => panic!("{point:?}: expected Persistence, got {other:?}"),
            }

            assert!(cafe.service.list_orders().await.unwrap().is_empty(), "{point:?}");
            assert_eq!(stock(&cafe, cafe.milk).await, dec!(1000), "{point:?}");
            assert_eq!(stock(&cafe, cafe.espresso).await, dec!(10), "{point:?}");
            assert!(cafe.store.transactions(cafe.milk).await.unwrap().is_empty(), "{point:?}");
        }

        // The store is still usable afterwards.
        cafe.service
            .create_order(test_order("Ada", &[(cafe.latte, 1)]))
            .await
            .unwrap();
        assert_eq!(stock(&cafe, cafe.milk).await, dec!(800));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_orders_never_over_consume() {
        let cafe = setup_with(dec!(10), dec!(10)).await;

        let first = {
            let service = Arc::clone(&cafe.service);
            let item = cafe.steamed_milk;
            tokio::spawn(async move { service.create_order(test_order("Ada", &[(item, 1)])).await })
        };
        let second = {
            let service = Arc::clone(&cafe.service);
            let item = cafe.steamed_milk;
            tokio::spawn(async move { service.create_order(test_order("Grace", &[(item, 1)])).await })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1);

        let rejected = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        match rejected {
            FulfillmentError::InsufficientStock(shortfalls) => {
                assert_eq!(shortfalls[0].required, dec!(6));
                assert_eq!(shortfalls[0].available, dec!(4));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        assert_eq!(stock(&cafe, cafe.milk).await, dec!(4));
        let rows = cafe.store.transactions(cafe.milk).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity_change, dec!(-6));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn batch_precheck_rejects_both_contending_orders() {
        let cafe = setup_with(dec!(10), dec!(10)).await;

        let report = cafe
            .service
            .batch_create_orders(vec![
                test_order("Ada", &[(cafe.steamed_milk, 1)]),
                test_order("Grace", &[(cafe.steamed_milk, 1)]),
            ])
            .await
            .unwrap();

        assert_eq!(report.summary.accepted, 0);
        assert_eq!(report.summary.rejected, 2);
        for processed in &report.processed_orders {
            assert_eq!(processed.status, OrderOutcome::Rejected);
            // Each order quotes its own need against the stock the batch saw.
            assert_eq!(
                processed.reason.as_deref(),
                Some("insufficient_inventory: Milk (need 6 ml, have 10 ml)")
            );
        }
        assert!(report.summary.inventory_updates.is_empty());
        assert_eq!(stock(&cafe, cafe.milk).await, dec!(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unresolvable_order_does_not_change_sibling_outcomes() {
        let cafe = setup_with(dec!(10), dec!(10)).await;
        let ghost = add_menu_item(
            &cafe.store,
            "Ghost latte",
            dec!(5.00),
            &[(IngredientId::new(), dec!(1), "g")],
        )
        .await;

        let pair = vec![
            test_order("Ada", &[(cafe.steamed_milk, 1)]),
            test_order("Grace", &[(cafe.steamed_milk, 1)]),
        ];
        let mut with_ghost = pair.clone();
        with_ghost.push(test_order("Linus", &[(ghost, 1)]));

        let alone = cafe.service.batch_create_orders(pair).await.unwrap();
        let together = cafe.service.batch_create_orders(with_ghost).await.unwrap();

        assert_eq!(together.summary.accepted, 0);
        assert_eq!(together.summary.rejected, 3);
        assert_eq!(&together.processed_orders[..2], &alone.processed_orders[..]);
        assert!(together.processed_orders[2]
            .reason
            .as_deref()
            .unwrap()
            .starts_with("recipe lookup failed"));
        assert_eq!(stock(&cafe, cafe.milk).await, dec!(10));
        assert!(cafe.service.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn short_ingredient_rejects_only_orders_that_use_it() {
        let cafe = setup_with(dec!(10), dec!(10)).await;

        let report = cafe
            .service
            .batch_create_orders(vec![
                test_order("Ada", &[(cafe.steamed_milk, 2)]),
                test_order("Grace", &[(cafe.americano, 1)]),
            ])
            .await
            .unwrap();

        assert_eq!(report.processed_orders[0].status, OrderOutcome::Rejected);
        assert_eq!(
            report.processed_orders[0].reason.as_deref(),
            Some("insufficient_inventory: Milk (need 12 ml, have 10 ml)")
        );
        assert_eq!(report.processed_orders[1].status, OrderOutcome::Accepted);
        assert_eq!(report.summary.total_revenue, dec!(3.00));
        assert_eq!(stock(&cafe, cafe.milk).await, dec!(10));
        assert_eq!(stock(&cafe, cafe.espresso).await, dec!(9));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn invalid_batch_order_fails_validation_first() {
        let cafe = setup_with(dec!(10), dec!(10)).await;

        let report = cafe
            .service
            .batch_create_orders(vec![
                test_order("  ", &[(cafe.steamed_milk, 2)]),
                test_order("Grace", &[(cafe.steamed_milk, 1)]),
            ])
            .await
            .unwrap();

        assert_eq!(report.processed_orders[0].status, OrderOutcome::Rejected);
        assert_eq!(
            report.processed_orders[0].reason.as_deref(),
            Some("validation failed: customer name is required")
        );
        // The invalid order's demand never counted against the pool.
        assert_eq!(report.processed_orders[1].status, OrderOutcome::Accepted);
        assert_eq!(stock(&cafe, cafe.milk).await, dec!(4));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn repeated_ingredient_is_deducted_once() {
        let cafe = setup().await;

        let receipt = cafe
            .service
            .create_order(test_order("Ada", &[(cafe.americano, 2), (cafe.doppio, 1)]))
            .await
            .unwrap();

        assert_eq!(receipt.order.total(), dec!(9.50));
        assert_eq!(receipt.deductions.len(), 1);
        assert_eq!(receipt.deductions[0].quantity_used, dec!(4));

        let rows = cafe.store.transactions(cafe.espresso).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity_change, dec!(-4));
        assert_eq!(stock(&cafe, cafe.espresso).await, dec!(6));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn batch_outcomes_are_isolated_and_positional() {
        let cafe = setup().await;

        let report = cafe
            .service
            .batch_create_orders(vec![
                test_order("Ada", &[(cafe.latte, 1)]),
                test_order("Grace", &[(MenuItemId::new(), 1)]),
                test_order("Linus", &[]),
                test_order("Barbara", &[(cafe.americano, 2)]),
            ])
            .await
            .unwrap();

        let names: Vec<_> = report
            .processed_orders
            .iter()
            .map(|p| p.customer_name.as_str())
            .collect();
        assert_eq!(names, vec!["Ada", "Grace", "Linus", "Barbara"]);

        let statuses: Vec<_> = report.processed_orders.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![
                OrderOutcome::Accepted,
                OrderOutcome::Rejected,
                OrderOutcome::Rejected,
                OrderOutcome::Accepted,
            ]
        );
        assert!(report.processed_orders[1]
            .reason
            .as_deref()
            .unwrap()
            .starts_with("recipe lookup failed"));
        assert!(report.processed_orders[2]
            .reason
            .as_deref()
            .unwrap()
            .starts_with("validation failed"));
        assert_eq!(report.processed_orders[0].total, Some(dec!(4.50)));
        assert_eq!(report.processed_orders[3].total, Some(dec!(6.00)));

        let summary = &report.summary;
        assert_eq!(summary.total_orders, 4);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.total_revenue, dec!(10.50));

        let updates: Vec<_> = summary
            .inventory_updates
            .iter()
            .map(|u| (u.name.as_str(), u.quantity_used, u.remaining))
            .collect();
        assert_eq!(
            updates,
            vec![("Espresso", dec!(3), dec!(7)), ("Milk", dec!(200), dec!(800))]
        );

        assert_eq!(cafe.service.list_orders().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn empty_batch_is_rejected() {
        let cafe = setup().await;
        let err = cafe.service.batch_create_orders(Vec::new()).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn batch_deadline_is_reported_to_caller() {
        let cafe = setup().await;

        // Hold the store so the batch cannot make progress.
        let blocker = cafe.store.begin().await.unwrap();
        let err = cafe
            .service
            .batch_create_orders_within(
                vec![test_order("Ada", &[(cafe.latte, 1)])],
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        drop(blocker);

        assert_eq!(err, FulfillmentError::DeadlineExceeded(Duration::from_millis(50)));
        assert_eq!(stock(&cafe, cafe.milk).await, dec!(1000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_orders_finish_after_deadline() {
        let inner = InMemoryFulfillmentStore::new();
        let espresso = add_ingredient(&inner, "Espresso", dec!(10), "shot", dec!(0)).await;
        let americano = add_menu_item(&inner, "Americano", dec!(3.00), &[(espresso, dec!(1), "shot")]).await;
        let waiting = Arc::new(Semaphore::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let service = OrderService::new(Arc::new(GatedStore {
            inner: inner.clone(),
            waiting: Arc::clone(&waiting),
            gate: Arc::clone(&gate),
        }));

        let deadline = Duration::from_millis(200);
        let err = service
            .batch_create_orders_within(
                vec![
                    test_order("Ada", &[(americano, 2)]),
                    test_order("Grace", &[(americano, 3)]),
                ],
                deadline,
            )
            .await
            .unwrap_err();
        assert_eq!(err, FulfillmentError::DeadlineExceeded(deadline));

        // Both orders are running and waiting for a unit of work.
        tokio::time::timeout(Duration::from_secs(5), waiting.acquire_many(2))
            .await
            .unwrap()
            .unwrap()
            .forget();
        assert!(inner.list_orders().await.unwrap().is_empty());
        assert_eq!(inner.ingredient(espresso).await.unwrap().quantity(), dec!(10));

        gate.add_permits(2);
        let mut orders = Vec::new();
        for _ in 0..200 {
            orders = inner.list_orders().await.unwrap();
            if orders.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(orders.len(), 2);
        assert_eq!(inner.ingredient(espresso).await.unwrap().quantity(), dec!(5));

        let rows = inner.transactions(espresso).await.unwrap();
        assert_eq!(rows.len(), 2);
        for order in &orders {
            let items = inner.order_items(order.id_typed()).await.unwrap();
            assert_eq!(items.len(), 1);
            let used: Decimal = rows
                .iter()
                .filter(|t| t.order_id == Some(order.id_typed()))
                .map(|t| -t.quantity_change)
                .sum();
            assert_eq!(used, Decimal::from(items[0].quantity));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn configured_deadline_applies_to_batches() {
        let store = Arc::new(InMemoryFulfillmentStore::new());
        let espresso = add_ingredient(&store, "Espresso", dec!(5), "shot", dec!(0)).await;
        let americano = add_menu_item(&store, "Americano", dec!(3.00), &[(espresso, dec!(1), "shot")]).await;
        let config = FulfillmentConfig::default().with_batch_deadline(Duration::from_secs(5));
        let service = OrderService::with_config(Arc::clone(&store), config);

        let report = service
            .batch_create_orders(vec![test_order("Ada", &[(americano, 2)])])
            .await
            .unwrap();
        assert_eq!(report.summary.accepted, 1);
        assert_eq!(store.ingredient(espresso).await.unwrap().quantity(), dec!(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn closing_records_one_transition() {
        let cafe = setup().await;
        let receipt = cafe
            .service
            .create_order(test_order("Ada", &[(cafe.latte, 1)]))
            .await
            .unwrap();
        let order_id = receipt.order.id_typed();

        let history = cafe.service.close_order(order_id, None).await.unwrap();
        assert_eq!(history.previous_status, OrderStatus::Pending);
        assert_eq!(history.new_status, OrderStatus::Delivered);
        assert_eq!(history.reason.as_deref(), Some("Order completed and delivered"));

        let err = cafe.service.close_order(order_id, None).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidStatus(_)));

        let rows = cafe.service.status_history(order_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            cafe.store.order(order_id).await.unwrap().status(),
            OrderStatus::Delivered
        );

        // Closing never touches inventory.
        assert_eq!(stock(&cafe, cafe.milk).await, dec!(800));
        assert_eq!(cafe.store.transactions(cafe.milk).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn status_updates_follow_the_lifecycle() {
        let cafe = setup().await;
        let receipt = cafe
            .service
            .create_order(test_order("Ada", &[(cafe.americano, 1)]))
            .await
            .unwrap();
        let order_id = receipt.order.id_typed();

        let err = cafe
            .service
            .update_order_status(order_id, "shipped", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        cafe.service
            .update_order_status(order_id, "preparing", Some("barista started".to_string()))
            .await
            .unwrap();
        cafe.service
            .update_order_status(order_id, "ready", None)
            .await
            .unwrap();

        let err = cafe
            .service
            .update_order_status(order_id, "preparing", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidStatus(_)));

        cafe.service
            .update_order_status(order_id, "cancelled", None)
            .await
            .unwrap();

        let rows = cafe.service.status_history(order_id).await.unwrap();
        let moves: Vec<_> = rows
            .iter()
            .map(|h| (h.previous_status, h.new_status))
            .collect();
        assert_eq!(
            moves,
            vec![
                (OrderStatus::Ready, OrderStatus::Cancelled),
                (OrderStatus::Preparing, OrderStatus::Ready),
                (OrderStatus::Pending, OrderStatus::Preparing),
            ]
        );

        let err = cafe
            .service
            .update_order_status(OrderId::new(), "ready", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn update_order_edits_header_and_status_together() {
        let cafe = setup().await;
        let receipt = cafe
            .service
            .create_order(test_order("Ada", &[(cafe.americano, 1)]))
            .await
            .unwrap();
        let order_id = receipt.order.id_typed();

        let renamed = cafe
            .service
            .update_order(
                order_id,
                UpdateOrderRequest {
                    customer_name: Some("Ada L.".to_string()),
                    special_instructions: Some(json!({"table": 4})),
                    ..UpdateOrderRequest::default()
                },
            )
            .await
            .unwrap();
        assert!(renamed.history.is_none());
        assert_eq!(renamed.order.customer_name(), "Ada L.");
        assert_eq!(renamed.order.status(), OrderStatus::Pending);

        let moved = cafe
            .service
            .update_order(
                order_id,
                UpdateOrderRequest {
                    special_instructions: Some(serde_json::Value::Null),
                    status: Some("preparing".to_string()),
                    reason: Some("barista started".to_string()),
                    ..UpdateOrderRequest::default()
                },
            )
            .await
            .unwrap();
        let history = moved.history.unwrap();
        assert_eq!(history.previous_status, OrderStatus::Pending);
        assert_eq!(history.new_status, OrderStatus::Preparing);
        assert_eq!(history.reason.as_deref(), Some("barista started"));

        let stored = cafe.service.get_order(order_id).await.unwrap().order;
        assert_eq!(stored.customer_name(), "Ada L.");
        assert_eq!(stored.special_instructions(), &json!({}));
        assert_eq!(stored.status(), OrderStatus::Preparing);
        assert_eq!(cafe.service.status_history(order_id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rejected_update_changes_nothing() {
        let cafe = setup().await;
        let receipt = cafe
            .service
            .create_order(test_order("Ada", &[(cafe.americano, 1)]))
            .await
            .unwrap();
        let order_id = receipt.order.id_typed();

        let err = cafe
            .service
            .update_order(order_id, UpdateOrderRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        let err = cafe
            .service
            .update_order(
                order_id,
                UpdateOrderRequest {
                    customer_name: Some("Grace".to_string()),
                    status: Some("shipped".to_string()),
                    ..UpdateOrderRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        cafe.service.close_order(order_id, None).await.unwrap();
        let err = cafe
            .service
            .update_order(
                order_id,
                UpdateOrderRequest {
                    customer_name: Some("Grace".to_string()),
                    status: Some("ready".to_string()),
                    ..UpdateOrderRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidStatus(_)));

        // The rename was staged in the same unit as the illegal move.
        let stored = cafe.service.get_order(order_id).await.unwrap().order;
        assert_eq!(stored.customer_name(), "Ada");
        assert_eq!(stored.status(), OrderStatus::Delivered);

        let err = cafe
            .service
            .update_order(
                OrderId::new(),
                UpdateOrderRequest {
                    customer_name: Some("Grace".to_string()),
                    ..UpdateOrderRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn all_status_history_spans_every_order() {
        let cafe = setup().await;
        let first = cafe
            .service
            .create_order(test_order("Ada", &[(cafe.americano, 1)]))
            .await
            .unwrap()
            .order
            .id_typed();
        let second = cafe
            .service
            .create_order(test_order("Grace", &[(cafe.americano, 1)]))
            .await
            .unwrap()
            .order
            .id_typed();

        assert!(cafe.service.all_status_history().await.unwrap().is_empty());

        cafe.service
            .update_order_status(first, "preparing", None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cafe.service.close_order(second, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cafe.service
            .update_order_status(first, "cancelled", None)
            .await
            .unwrap();

        let rows = cafe.service.all_status_history().await.unwrap();
        let moves: Vec<_> = rows.iter().map(|h| (h.order_id, h.new_status)).collect();
        assert_eq!(
            moves,
            vec![
                (first, OrderStatus::Cancelled),
                (second, OrderStatus::Delivered),
                (first, OrderStatus::Preparing),
            ]
        );

        cafe.service
            .delete_order(second, DeletePolicy::default())
            .await
            .unwrap();
        assert_eq!(cafe.service.all_status_history().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_retains_consumption_by_default() {
        let cafe = setup().await;
        let receipt = cafe
            .service
            .create_order(test_order("Ada", &[(cafe.latte, 1)]))
            .await
            .unwrap();
        let order_id = receipt.order.id_typed();
        cafe.service
            .update_order_status(order_id, "preparing", None)
            .await
            .unwrap();

        let restocked = cafe
            .service
            .delete_order(order_id, DeletePolicy::default())
            .await
            .unwrap();
        assert!(restocked.is_empty());

        assert!(matches!(
            cafe.service.get_order(order_id).await,
            Err(FulfillmentError::NotFound(_))
        ));
        assert!(cafe.store.order_items(order_id).await.unwrap().is_empty());
        assert!(cafe.store.status_history(order_id).await.unwrap().is_empty());
        assert_eq!(stock(&cafe, cafe.milk).await, dec!(800));
        assert_eq!(cafe.store.transactions(cafe.milk).await.unwrap().len(), 1);

        let err = cafe
            .service
            .delete_order(order_id, DeletePolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_with_restock_credits_stock_back() {
        let cafe = setup().await;
        let receipt = cafe
            .service
            .create_order(test_order("Ada", &[(cafe.latte, 2)]))
            .await
            .unwrap();
        let order_id = receipt.order.id_typed();

        let restocked = cafe
            .service
            .delete_order(order_id, DeletePolicy::Restock)
            .await
            .unwrap();
        assert_eq!(restocked.len(), 2);

        assert_eq!(stock(&cafe, cafe.milk).await, dec!(1000));
        assert_eq!(stock(&cafe, cafe.espresso).await, dec!(10));

        let rows = cafe.store.transactions(cafe.milk).await.unwrap();
        assert_eq!(rows.len(), 2);
        let credit = rows
            .iter()
            .find(|t| t.transaction_type == TransactionType::Adjustment)
            .unwrap();
        assert_eq!(credit.quantity_change, dec!(400));
        assert_eq!(credit.reason, format!("Order {order_id} deleted"));
        assert_eq!(ledger_total(&cafe, cafe.milk).await, Decimal::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn low_stock_is_signalled_not_rejected() {
        let store = Arc::new(InMemoryFulfillmentStore::new());
        let milk = add_ingredient(&store, "Milk", dec!(1000), "ml", dec!(500)).await;
        let flat_white = add_menu_item(&store, "Flat white", dec!(4.00), &[(milk, dec!(150), "ml")]).await;
        let service = OrderService::new(Arc::clone(&store));

        let receipt = service
            .create_order(test_order("Ada", &[(flat_white, 4)]))
            .await
            .unwrap();

        assert_eq!(receipt.low_stock.len(), 1);
        assert_eq!(receipt.low_stock[0].ingredient_id, milk);
        assert_eq!(receipt.low_stock[0].remaining, dec!(400));
        assert_eq!(receipt.low_stock[0].reorder_point, dec!(500));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unknown_or_recipe_less_items_fail_lookup() {
        let cafe = setup().await;

        let err = cafe
            .service
            .create_order(test_order("Ada", &[(MenuItemId::new(), 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::RecipeLookup(_)));

        let water = MenuItem::new(MenuItemId::new(), "Water", dec!(0)).unwrap();
        let water_id = water.id;
        cafe.store.add_menu_item_without_recipe(water).await;
        let err = cafe
            .service
            .create_order(test_order("Ada", &[(cafe.latte, 1), (water_id, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::RecipeLookup(_)));

        assert_eq!(stock(&cafe, cafe.milk).await, dec!(1000));
        assert!(cafe.service.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reads_report_missing_records() {
        let cafe = setup().await;

        assert!(matches!(
            cafe.service.status_history(OrderId::new()).await,
            Err(FulfillmentError::NotFound(_))
        ));
        assert!(matches!(
            cafe.service.ingredient_transactions(IngredientId::new()).await,
            Err(FulfillmentError::NotFound(_))
        ));

        let first = cafe
            .service
            .create_order(test_order("Ada", &[(cafe.americano, 1)]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = cafe
            .service
            .create_order(test_order("Grace", &[(cafe.americano, 1)]))
            .await
            .unwrap();

        let ids: Vec<_> = cafe
            .service
            .list_orders()
            .await
            .unwrap()
            .iter()
            .map(|o| o.id_typed())
            .collect();
        assert_eq!(ids, vec![second.order.id_typed(), first.order.id_typed()]);
    }
}
