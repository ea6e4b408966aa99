//! End-to-end tests for meta relations: attach, detach and the embedded
//! meta lists (markings, labels, authorship, containers).

use pretty_assertions::assert_eq;
use stixgraph::{
    Actor, Element, Entity, ErrorKind, EventPayload, KnowledgeGraph, MemoryStore, MetaInput,
    RelationClass, RelationshipInput,
};

fn analyst() -> Actor {
    Actor::new("user-1", "analyst")
}

async fn entity(graph: &KnowledgeGraph<MemoryStore>, entity_type: &str) -> Entity {
    graph.create_entity(Entity::new(entity_type)).await.unwrap()
}

/// (meta type, owner type, target type) for every standard meta type.
const META_CASES: &[(&str, &str, &str)] = &[
    ("object-marking", "Malware", "Marking-Definition"),
    ("object-label", "Indicator", "Label"),
    ("created-by", "Campaign", "Organization"),
    ("kill-chain-phase", "Attack-Pattern", "Kill-Chain-Phase"),
    ("external-reference", "Vulnerability", "External-Reference"),
    ("object", "Report", "Malware"),
];

// ============================================================================
// 1. Scenario: marking a report
// ============================================================================

#[tokio::test]
async fn test_marking_attach_then_detach() {
    let graph = KnowledgeGraph::open_memory().await.unwrap();
    let report = entity(&graph, "Report").await;
    let marking = graph
        .create_entity(Entity::new("Marking-Definition").with_attribute("name", "TLP:AMBER"))
        .await
        .unwrap();

    // A retried attach must not duplicate the edge.
    for _ in 0..2 {
        graph
            .relationships()
            .attach_meta(&analyst(), &report.internal_id, MetaInput::new("object-marking", &marking.internal_id))
            .await
            .unwrap();
    }

    let markings = graph.relationships().marking_definitions(&report.internal_id).await.unwrap();
    let ids: Vec<&str> = markings.nodes().map(|m| m.internal_id.as_str()).collect();
    assert_eq!(ids, vec![marking.internal_id.as_str()]);
    assert_eq!(markings.page_info.global_count, 1);

    let owner = graph
        .relationships()
        .detach_meta(&analyst(), &report.internal_id, &marking.internal_id, "object-marking")
        .await
        .unwrap();
    assert_eq!(owner.internal_id(), report.internal_id);

    let markings = graph.relationships().marking_definitions(&report.internal_id).await.unwrap();
    assert!(markings.is_empty());

    // Detaching again is a no-op that still answers with the owner.
    let owner = graph
        .relationships()
        .detach_meta(&analyst(), &report.internal_id, &marking.internal_id, "object-marking")
        .await
        .unwrap();
    assert_eq!(owner.internal_id(), report.internal_id);
}

// ============================================================================
// 2. Every meta type attaches and detaches; wrong entry point is refused
// ============================================================================

#[tokio::test]
async fn test_every_meta_type_attaches_and_detaches() {
    let graph = KnowledgeGraph::open_memory().await.unwrap();
    for (ty, owner_type, target_type) in META_CASES {
        assert_eq!(graph.registry().classify(ty), RelationClass::Meta);
        let owner = entity(&graph, owner_type).await;
        let target = entity(&graph, target_type).await;

        let edge = graph
            .relationships()
            .attach_meta(&analyst(), &owner.internal_id, MetaInput::new(*ty, &target.internal_id))
            .await
            .unwrap_or_else(|e| panic!("attach {ty}: {e}"));
        assert_eq!(edge.from_id, owner.internal_id);
        assert_eq!(edge.to_id, target.internal_id);

        graph
            .relationships()
            .detach_meta(&analyst(), &owner.internal_id, &target.internal_id, ty)
            .await
            .unwrap_or_else(|e| panic!("detach {ty}: {e}"));
    }
}

#[tokio::test]
async fn test_meta_types_cannot_be_created_as_core() {
    let graph = KnowledgeGraph::open_memory().await.unwrap();
    for (ty, owner_type, target_type) in META_CASES {
        let owner = entity(&graph, owner_type).await;
        let target = entity(&graph, target_type).await;
        let err = graph
            .relationships()
            .create(&analyst(), RelationshipInput::new(*ty, &owner.internal_id, &target.internal_id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRelationType, "{ty} went through create");
    }
}

#[tokio::test]
async fn test_meta_on_relationship_owner() {
    let graph = KnowledgeGraph::open_memory().await.unwrap();
    let malware = entity(&graph, "Malware").await;
    let tool = entity(&graph, "Tool").await;
    let marking = entity(&graph, "Marking-Definition").await;
    let rel = graph
        .relationships()
        .create(&analyst(), RelationshipInput::new("uses", &malware.internal_id, &tool.internal_id))
        .await
        .unwrap();

    let mut sub = graph.bus().subscribe("core-relationship.edited").unwrap();
    graph
        .relationships()
        .attach_meta(&analyst(), &rel.internal_id, MetaInput::new("object-marking", &marking.internal_id))
        .await
        .unwrap();
    let event = sub.try_recv().unwrap();
    assert!(matches!(event.payload, EventPayload::Relationship(ref r) if r.relationship_type == "object-marking"));

    graph
        .relationships()
        .detach_meta(&analyst(), &rel.internal_id, &marking.internal_id, "object-marking")
        .await
        .unwrap();
    let event = sub.try_recv().unwrap();
    assert!(matches!(event.payload, EventPayload::Relationship(ref r) if r.internal_id == rel.internal_id));
}

#[tokio::test]
async fn test_attach_checks_direction_and_existence() {
    let graph = KnowledgeGraph::open_memory().await.unwrap();
    let report = entity(&graph, "Report").await;
    let label = entity(&graph, "Label").await;

    let err = graph
        .relationships()
        .attach_meta(&analyst(), &report.internal_id, MetaInput::new("object-marking", &label.internal_id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalDirection);

    let err = graph
        .relationships()
        .attach_meta(&analyst(), "missing-owner", MetaInput::new("object-label", &label.internal_id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = graph
        .relationships()
        .attach_meta(&analyst(), &report.internal_id, MetaInput::new("object-label", "missing-label"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // `object` hangs off containers only.
    let malware = entity(&graph, "Malware").await;
    let err = graph
        .relationships()
        .attach_meta(&analyst(), &malware.internal_id, MetaInput::new("object", &report.internal_id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalDirection);
}

#[tokio::test]
async fn test_detach_checks_class_and_owner() {
    let graph = KnowledgeGraph::open_memory().await.unwrap();
    let malware = entity(&graph, "Malware").await;
    let tool = entity(&graph, "Tool").await;

    let err = graph
        .relationships()
        .detach_meta(&analyst(), &malware.internal_id, &tool.internal_id, "uses")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRelationType);

    let err = graph
        .relationships()
        .detach_meta(&analyst(), "missing-owner", &tool.internal_id, "object-label")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============================================================================
// 3. Embedded meta lists
// ============================================================================

#[tokio::test]
async fn test_containers_and_author() {
    let graph = KnowledgeGraph::open_memory().await.unwrap();
    let malware = entity(&graph, "Malware").await;
    let report = entity(&graph, "Report").await;
    let note = entity(&graph, "Note").await;
    let opinion = entity(&graph, "Opinion").await;
    let author = graph
        .create_entity(Entity::new("Individual").with_attribute("name", "Jane Analyst"))
        .await
        .unwrap();

    for container in [&report, &note, &opinion] {
        graph
            .relationships()
            .attach_meta(&analyst(), &container.internal_id, MetaInput::new("object", &malware.internal_id))
            .await
            .unwrap();
    }
    graph
        .relationships()
        .attach_meta(&analyst(), &malware.internal_id, MetaInput::new("created-by", &author.internal_id))
        .await
        .unwrap();

    let service = graph.relationships();
    assert_eq!(service.reports(&malware.internal_id).await.unwrap().into_nodes()[0].internal_id, report.internal_id);
    assert_eq!(service.notes(&malware.internal_id).await.unwrap().into_nodes()[0].internal_id, note.internal_id);
    assert_eq!(service.opinions(&malware.internal_id).await.unwrap().into_nodes()[0].internal_id, opinion.internal_id);

    let creator = service.created_by(&malware.internal_id).await.unwrap().unwrap();
    assert_eq!(creator.name(), Some("Jane Analyst"));

    let reports = service.reports(&malware.internal_id).await.unwrap();
    let context = reports.edges[0].relation_context.clone().unwrap();
    assert_eq!(context.relationship_type, "object");
    assert_eq!(context.from_id, report.internal_id);
    assert_eq!(context.to_id, malware.internal_id);
}

#[tokio::test]
async fn test_detach_owner_payload_reflects_current_state() {
    let graph = KnowledgeGraph::open_memory().await.unwrap();
    let indicator = entity(&graph, "Indicator").await;
    let label = entity(&graph, "Label").await;
    graph
        .relationships()
        .attach_meta(&analyst(), &indicator.internal_id, MetaInput::new("object-label", &label.internal_id))
        .await
        .unwrap();

    let mut sub = graph.bus().subscribe("core-object.edited").unwrap();
    let owner = graph
        .relationships()
        .detach_meta(&analyst(), &indicator.internal_id, &label.internal_id, "object-label")
        .await
        .unwrap();
    assert!(matches!(owner, Element::Entity(ref e) if e.internal_id == indicator.internal_id));

    let event = sub.try_recv().unwrap();
    assert_eq!(event.payload, EventPayload::Entity(indicator));
    assert!(sub.try_recv().is_none());
}
